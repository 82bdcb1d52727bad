use std::fmt;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
/// Re-export the `RS256KeyPair` type from `jwt_simple` to ease loading
pub use jwt_simple::algorithms::RS256KeyPair;
use jwt_simple::prelude::*;

use crate::errors::{BigQueryError, BigQueryResult};

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Padding is optional and stray low bits in the final symbol are ignored
const LENIENT: GeneralPurposeConfig = GeneralPurposeConfig::new()
    .with_decode_allow_trailing_bits(true)
    .with_decode_padding_mode(DecodePaddingMode::Indifferent);
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_owned()
}

/// A Google service account key, as downloaded from the cloud console
#[derive(Clone, serde::Deserialize, serde::Serialize)]
pub struct ServiceAccountCredential {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub private_key_id: Option<String>,
    pub private_key: String,
    pub client_email: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl fmt::Debug for ServiceAccountCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountCredential")
            .field("kind", &self.kind)
            .field("project_id", &self.project_id)
            .field("private_key_id", &self.private_key_id)
            .field("private_key", &"<redacted>")
            .field("client_email", &self.client_email)
            .field("client_id", &self.client_id)
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

impl ServiceAccountCredential {
    /// Decode a base64-encoded service account key file
    ///
    /// Whitespace in the encoded text and newlines in the decoded JSON are ignored,
    /// so keys copied out of environment variables or text areas still load.
    pub fn decode(encoded: &str) -> BigQueryResult<Self> {
        let compact: String = encoded
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        let bytes = match STANDARD_LENIENT.decode(&compact) {
            Ok(bytes) => bytes,
            Err(err) => URL_SAFE_LENIENT.decode(&compact).map_err(|_| err)?,
        };
        let json = String::from_utf8_lossy(&bytes).replace(['\n', '\r'], "");
        serde_json::from_str(&json).map_err(BigQueryError::CredentialParse)
    }

    /// Load the RSA signing key embedded in the credential
    pub fn key_pair(&self) -> BigQueryResult<RS256KeyPair> {
        let key_pair = RS256KeyPair::from_pem(&self.private_key)?;
        Ok(match &self.private_key_id {
            Some(id) => key_pair.with_key_id(id),
            None => key_pair,
        })
    }
}

#[derive(serde::Serialize, serde::Deserialize, Debug)]
pub(crate) struct ScopeClaim {
    pub scope: String,
}

/// Create the signed assertion for the OAuth 2.0 JWT bearer grant
pub fn create_assertion(
    key_pair: &RS256KeyPair,
    credential: &ServiceAccountCredential,
    scope: &str,
) -> BigQueryResult<String> {
    let claims = Claims::with_custom_claims(
        ScopeClaim {
            scope: scope.to_owned(),
        },
        Duration::from_mins(60),
    )
    .with_issuer(&credential.client_email)
    .with_audience(&credential.token_uri);
    log::debug!(
        "Signing assertion for {} with scope {}",
        credential.client_email,
        scope
    );
    Ok(key_pair.sign(claims)?)
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};

    use super::*;

    fn key_file(private_key: &str) -> serde_json::Value {
        serde_json::json!({
            "type": "service_account",
            "project_id": "test-project",
            "private_key_id": "abc123",
            "private_key": private_key,
            "client_email": "connector@test-project.iam.gserviceaccount.com",
            "client_id": "1234567890",
        })
    }

    #[test]
    fn decodes_pretty_printed_key_file() -> BigQueryResult<()> {
        let pretty = serde_json::to_string_pretty(&key_file("PEM"))?;
        assert!(pretty.contains('\n'));
        let credential = ServiceAccountCredential::decode(&STANDARD.encode(pretty))?;
        assert_eq!(
            credential.client_email,
            "connector@test-project.iam.gserviceaccount.com"
        );
        assert_eq!(credential.project_id.as_deref(), Some("test-project"));
        assert_eq!(credential.token_uri, DEFAULT_TOKEN_URI);
        Ok(())
    }

    #[test]
    fn tolerates_wrapped_and_unpadded_base64() -> BigQueryResult<()> {
        let encoded = STANDARD_NO_PAD.encode(key_file("PEM").to_string());
        let wrapped = encoded
            .as_bytes()
            .chunks(64)
            .map(|chunk| std::str::from_utf8(chunk).unwrap())
            .collect::<Vec<_>>()
            .join("\n");
        let credential = ServiceAccountCredential::decode(&wrapped)?;
        assert_eq!(credential.private_key, "PEM");
        Ok(())
    }

    #[test]
    fn ignores_trailing_bits() -> BigQueryResult<()> {
        let mut json = key_file("PEM").to_string();
        json.push(' ');
        while json.len() % 3 != 1 {
            json.push(' ');
        }
        // The last byte is a space, so its final symbol carries four zero bits
        let mut encoded = STANDARD_NO_PAD.encode(&json);
        assert_eq!(encoded.pop(), Some('A'));
        encoded.push('B');
        assert!(STANDARD_NO_PAD.decode(&encoded).is_err());
        let credential = ServiceAccountCredential::decode(&encoded)?;
        assert_eq!(credential.private_key, "PEM");

        let padded = format!("{encoded}==");
        assert_eq!(ServiceAccountCredential::decode(&padded)?.private_key, "PEM");
        Ok(())
    }

    #[test]
    fn rejects_malformed_base64() {
        let err = ServiceAccountCredential::decode("not*base64!").unwrap_err();
        assert!(matches!(err, BigQueryError::CredentialDecode(_)));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = ServiceAccountCredential::decode(&STANDARD.encode("{not json")).unwrap_err();
        assert!(matches!(err, BigQueryError::CredentialParse(_)));
    }

    #[test]
    fn debug_redacts_private_key() -> BigQueryResult<()> {
        let credential: ServiceAccountCredential =
            serde_json::from_value(key_file("super secret"))?;
        let printed = format!("{credential:?}");
        assert!(!printed.contains("super secret"));
        assert!(printed.contains("<redacted>"));
        Ok(())
    }

    #[test]
    fn verify_assertion() -> BigQueryResult<()> {
        let key = RS256KeyPair::generate(2048)?;
        let credential: ServiceAccountCredential =
            serde_json::from_value(key_file(&key.to_pem()?))?;
        let scope = "https://www.googleapis.com/auth/cloud-platform";
        let token = create_assertion(&credential.key_pair()?, &credential, scope)?;
        let claims = key
            .public_key()
            .verify_token::<ScopeClaim>(&token, None)?;
        assert_eq!(claims.custom.scope, scope);
        assert_eq!(claims.issuer.as_deref(), Some(credential.client_email.as_str()));
        Ok(())
    }
}
