use std::{net::{IpAddr, Ipv4Addr, SocketAddr}, str::FromStr};

use tracing::warn;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_IMAGEN_MODEL: &str = "imagen-4.0-generate-001";
pub const DEFAULT_GEMINI_IMAGE_MODEL: &str = "gemini-2.5-flash-image-preview";

/// Which endpoint renders step images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageBackend {
    /// `:predict` on an Imagen model. Continuity is carried by the prompt only.
    Imagen,
    /// `:generateContent` on a Gemini image model, with the previous image attached.
    Gemini,
}

impl FromStr for ImageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "imagen" => Ok(ImageBackend::Imagen),
            "gemini" => Ok(ImageBackend::Gemini),
            other => Err(format!("unknown image backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub base_url: String,
    pub text_model: String,
    pub image_model: String,
    pub image_backend: ImageBackend,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE.to_string(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            image_model: DEFAULT_IMAGEN_MODEL.to_string(),
            image_backend: ImageBackend::Imagen,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub gemini: GeminiConfig,
    /// Seeds the in-memory session key. Never written anywhere.
    pub preset_api_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let image_backend = parse_or(&lookup, "IMAGE_BACKEND", ImageBackend::Imagen);
        let default_image_model = match image_backend {
            ImageBackend::Imagen => DEFAULT_IMAGEN_MODEL,
            ImageBackend::Gemini => DEFAULT_GEMINI_IMAGE_MODEL,
        };
        let gemini = GeminiConfig {
            base_url: lookup("GEMINI_API_BASE")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            text_model: lookup("GEMINI_TEXT_MODEL").unwrap_or_else(|| DEFAULT_TEXT_MODEL.to_string()),
            image_model: lookup("GEMINI_IMAGE_MODEL").unwrap_or_else(|| default_image_model.to_string()),
            image_backend,
        };
        let ip = parse_or(&lookup, "BIND_ADDR", IpAddr::V4(Ipv4Addr::LOCALHOST));
        let port = parse_or(&lookup, "PORT", 8080u16);
        Self {
            addr: SocketAddr::new(ip, port),
            gemini,
            preset_api_key: lookup("GEMINI_API_KEY").filter(|k| !k.trim().is_empty()),
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T {
    match lookup(name) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("⚠️ Ignoring invalid {}={:?}, using default", name, raw);
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults_bind_locally() {
        let cfg = config(&[]);
        assert_eq!(cfg.addr, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(cfg.gemini.image_backend, ImageBackend::Imagen);
        assert_eq!(cfg.gemini.image_model, DEFAULT_IMAGEN_MODEL);
        assert!(cfg.preset_api_key.is_none());
    }

    #[test]
    fn gemini_backend_switches_default_model() {
        let cfg = config(&[("IMAGE_BACKEND", "Gemini"), ("GEMINI_API_BASE", "http://localhost:9000/v1beta/")]);
        assert_eq!(cfg.gemini.image_backend, ImageBackend::Gemini);
        assert_eq!(cfg.gemini.image_model, DEFAULT_GEMINI_IMAGE_MODEL);
        assert_eq!(cfg.gemini.base_url, "http://localhost:9000/v1beta");
    }

    #[test]
    fn invalid_values_fall_back() {
        let cfg = config(&[("PORT", "eighty"), ("IMAGE_BACKEND", "dall-e"), ("GEMINI_API_KEY", "  ")]);
        assert_eq!(cfg.addr.port(), 8080);
        assert_eq!(cfg.gemini.image_backend, ImageBackend::Imagen);
        assert!(cfg.preset_api_key.is_none());
    }
}
