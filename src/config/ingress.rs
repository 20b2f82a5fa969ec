//! Ingress configuration and public hostname resolution

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Ingress configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngressConfig {
    /// Protocol of public URLs (default: "http")
    #[serde(default = "default_protocol")]
    pub protocol: String,

    /// Domain public hostnames live under (default: "svc.cluster.local")
    #[serde(default = "default_hostname_suffix")]
    pub hostname_suffix: String,

    /// Port of public URLs (default: 80)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Istio gateway routing rules attach to, as `<name>.<namespace>`
    #[serde(default = "default_gateway")]
    pub gateway: String,

    /// Public URL template
    ///
    /// Supports: ${INGRESS_PROTOCOL}, ${INGRESS_HOSTNAME_SUFFIX},
    /// ${INGRESS_PORT}, ${PROJECT}, ${STAGE}, ${SERVICE}
    #[serde(default = "default_hostname_template")]
    pub hostname_template: String,

    /// Ship the gateway inside generated charts
    #[serde(default)]
    pub create_gateway: bool,
}

fn default_protocol() -> String {
    "http".to_string()
}

fn default_hostname_suffix() -> String {
    "svc.cluster.local".to_string()
}

fn default_port() -> u16 {
    80
}

fn default_gateway() -> String {
    "public-gateway.istio-system".to_string()
}

fn default_hostname_template() -> String {
    "${INGRESS_PROTOCOL}://${SERVICE}.${PROJECT}-${STAGE}.${INGRESS_HOSTNAME_SUFFIX}:${INGRESS_PORT}"
        .to_string()
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            protocol: default_protocol(),
            hostname_suffix: default_hostname_suffix(),
            port: default_port(),
            gateway: default_gateway(),
            hostname_template: default_hostname_template(),
            create_gateway: false,
        }
    }
}

static PLACEHOLDER: OnceLock<Result<Regex, String>> = OnceLock::new();

/// `${NAME}` placeholders in a hostname template, compiled once
fn placeholder_pattern() -> Result<&'static Regex, ConfigError> {
    PLACEHOLDER
        .get_or_init(|| Regex::new(r"\$\{([^}]*)\}").map_err(|e| e.to_string()))
        .as_ref()
        .map_err(|message| ConfigError::ParseError {
            message: message.clone(),
        })
}

impl IngressConfig {
    /// Public URL of a service, e.g. `http://carts.sockshop-dev.example.com:80`
    pub fn public_url(&self, project: &str, stage: &str, service: &str) -> Result<String, ConfigError> {
        let template = &self.hostname_template;
        if !template.contains("://") {
            return Err(ConfigError::MissingProtocol {
                template: template.clone(),
            });
        }

        let placeholder = placeholder_pattern()?;

        let port = self.port.to_string();
        let mut url = String::with_capacity(template.len());
        let mut last = 0;
        for captures in placeholder.captures_iter(template) {
            let (Some(whole), Some(key)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            let value = match key.as_str() {
                "INGRESS_PROTOCOL" => self.protocol.as_str(),
                "INGRESS_HOSTNAME_SUFFIX" => self.hostname_suffix.as_str(),
                "INGRESS_PORT" => port.as_str(),
                "PROJECT" => project,
                "STAGE" => stage,
                "SERVICE" => service,
                other => {
                    return Err(ConfigError::UnknownPlaceholder {
                        template: template.clone(),
                        placeholder: other.to_string(),
                    })
                }
            };
            url.push_str(&template[last..whole.start()]);
            url.push_str(value);
            last = whole.end();
        }
        url.push_str(&template[last..]);

        Ok(url)
    }

    /// Host part of [`public_url`](Self::public_url), without protocol, port, or path
    pub fn public_host(&self, project: &str, stage: &str, service: &str) -> Result<String, ConfigError> {
        let url = self.public_url(project, stage, service)?;
        Ok(host_of(&url).to_string())
    }
}

fn host_of(url: &str) -> &str {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = rest.split('/').next().unwrap_or_default();
    authority
        .rsplit_once(':')
        .map_or(authority, |(host, _port)| host)
}
