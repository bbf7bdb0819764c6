//! Firmware source rendering.
//!
//! Templates are plain text with `{placeholder}` markers. A built-in
//! template ships with the daemon; named templates stored in the database
//! take precedence when requested.

use crate::error::ServiceError;
use crate::storage::Database;

/// Values substituted into a firmware template.
pub struct RenderContext<'a> {
    pub device_id: &'a str,
    pub device_name: &'a str,
    pub wifi_ssid: &'a str,
    pub wifi_password: &'a str,
    pub broker_host: &'a str,
    pub ca_cert: &'a str,
}

pub const DEFAULT_TEMPLATE_NAME: &str = "default";

/// Built-in sketch used when no stored template matches.
const BUILTIN_TEMPLATE: &str = r#"// Auto-generated firmware for {device_id} ({device_name})
#include <WiFiClientSecure.h>
#include <PubSubClient.h>

const char* DEVICE_ID = "{device_id}";
const char* WIFI_SSID = "{wifi_ssid}";
const char* WIFI_PASSWORD = "{wifi_password}";
const char* BROKER_HOST = "{broker_host}";
const int BROKER_PORT = 8883;

const char CA_CERT[] PROGMEM = R"EOF(
{ca_cert}
)EOF";

WiFiClientSecure tls;
PubSubClient mqtt(tls);

void setup() {
  Serial.begin(115200);
  WiFi.begin(WIFI_SSID, WIFI_PASSWORD);
  while (WiFi.status() != WL_CONNECTED) {
    delay(500);
  }
  tls.setCACert(CA_CERT);
  mqtt.setServer(BROKER_HOST, BROKER_PORT);
}

void loop() {
  if (!mqtt.connected()) {
    mqtt.connect(DEVICE_ID);
    mqtt.subscribe("devices/{device_id}/control");
  }
  mqtt.loop();
  delay(100);
}
"#;

/// Substitute context values into a template.
pub fn render(template: &str, ctx: &RenderContext<'_>) -> String {
    template
        .replace("{device_id}", ctx.device_id)
        .replace("{device_name}", ctx.device_name)
        .replace("{wifi_ssid}", ctx.wifi_ssid)
        .replace("{wifi_password}", ctx.wifi_password)
        .replace("{broker_host}", ctx.broker_host)
        .replace("{ca_cert}", ctx.ca_cert)
}

/// Resolve a template by name, falling back to the built-in sketch for the
/// default name. Unknown names are an error rather than a silent fallback.
pub async fn resolve_template(db: &Database, name: &str) -> Result<String, ServiceError> {
    if let Some(template) = db.get_template(name).await? {
        return Ok(template.content);
    }
    if name == DEFAULT_TEMPLATE_NAME {
        return Ok(BUILTIN_TEMPLATE.to_string());
    }
    Err(ServiceError::NotFound(format!("firmware template {name}")))
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn ctx<'a>() -> RenderContext<'a> {
        RenderContext {
            device_id: "dev-1",
            device_name: "greenhouse",
            wifi_ssid: "lab",
            wifi_password: "hunter2",
            broker_host: "10.0.0.1",
            ca_cert: "-----BEGIN CERTIFICATE-----",
        }
    }

    #[test]
    fn render_substitutes_all_placeholders() {
        let out = render(BUILTIN_TEMPLATE, &ctx());
        assert!(out.contains("\"dev-1\""));
        assert!(out.contains("greenhouse"));
        assert!(out.contains("\"lab\""));
        assert!(out.contains("devices/dev-1/control"));
        assert!(!out.contains("{device_id}"));
        assert!(!out.contains("{ca_cert}"));
    }

    #[test]
    fn render_leaves_braces_without_markers_alone() {
        let out = render("void loop() { x(); }", &ctx());
        assert_eq!(out, "void loop() { x(); }");
    }

    #[tokio::test]
    async fn stored_template_wins_over_builtin() {
        let db = Database::open_in_memory().await.unwrap();
        db.upsert_template("default", "custom {device_id}").await.unwrap();
        let template = resolve_template(&db, "default").await.unwrap();
        assert_eq!(render(&template, &ctx()), "custom dev-1");
    }

    #[tokio::test]
    async fn unknown_template_is_not_found() {
        let db = Database::open_in_memory().await.unwrap();
        assert!(matches!(
            resolve_template(&db, "nope").await.unwrap_err(),
            ServiceError::NotFound(_)
        ));
    }
}
