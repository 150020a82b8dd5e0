//! Extraction of the PIX copy-paste payload and QR image from the vendor
//! response, whose field names differ between backend versions.

use base64::Engine;
use serde_json::Value;

const PAYLOAD_FIELDS: &[&str] = &[
    "qrcode",
    "pix_copia_cola",
    "pixCopiaECola",
    "copia_cola",
    "copiaECola",
    "payload",
    "emv",
    "brcode",
    "qr_code_text",
];

const IMAGE_FIELDS: &[&str] = &[
    "imagemQrcode",
    "imagem_qrcode",
    "qrcode_image",
    "qr_code_base64",
    "qrcode_base64",
    "image",
    "imagem",
];

const ENVELOPES: &[&str] = &["data", "pix"];

const DATA_URL_PREFIX: &str = "data:image/png;base64,";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PixCharge {
    pub payload: Option<String>,
    /// Always a data URL.
    pub image_data_url: Option<String>,
}

impl PixCharge {
    pub fn from_response(response: &Value) -> Self {
        let payload = probe(response, PAYLOAD_FIELDS);
        let image_data_url = probe(response, IMAGE_FIELDS).map(|raw| {
            if raw.starts_with("data:") {
                raw
            } else {
                format!("{}{}", DATA_URL_PREFIX, raw)
            }
        });
        Self {
            payload,
            image_data_url,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_none() && self.image_data_url.is_none()
    }

    /// Decoded image bytes, `None` if there is no image or it is not valid
    /// base64.
    pub fn image_bytes(&self) -> Option<Vec<u8>> {
        let url = self.image_data_url.as_deref()?;
        let encoded = url.split_once(',').map(|(_, data)| data).unwrap_or(url);
        base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .ok()
    }
}

/// First non-empty string among `fields`, looking at the top level before
/// each envelope in turn.
fn probe(response: &Value, fields: &[&str]) -> Option<String> {
    let scopes = std::iter::once(response).chain(
        ENVELOPES
            .iter()
            .filter_map(|envelope| response.get(envelope)),
    );
    for scope in scopes {
        for field in fields {
            if let Some(text) = scope.get(field).and_then(Value::as_str) {
                let text = text.trim();
                if !text.is_empty() {
                    return Some(text.to_string());
                }
            }
        }
    }
    None
}
