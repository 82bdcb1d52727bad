use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};

#[derive(thiserror::Error, Debug)]
pub enum BigQueryError {
    #[error("Service account is not valid base64: {0}")]
    CredentialDecode(#[from] base64::DecodeError),
    #[error("Service account is not valid JSON: {0}")]
    CredentialParse(#[source] serde_json::Error),
    #[error(transparent)]
    Key(#[from] jwt_simple::Error),
    #[error("Authentication failed: {error}: {description}")]
    Authentication { error: String, description: String },
    #[error(transparent)]
    Request(#[from] reqwest::Error),
    #[error("BigQuery server error: {code} {status}: {message}")]
    ServerError {
        code: u16,
        status: String,
        message: String,
    },
    #[error("BigQuery job {job_id} failed: {reason}: {message}")]
    JobFailed {
        job_id: String,
        reason: String,
        message: String,
    },
    #[error(transparent)]
    JSONError(#[from] serde_json::Error),
    #[error(transparent)]
    InvalidHeaderValue(#[from] reqwest::header::InvalidHeaderValue),
}

pub type BigQueryResult<T> = Result<T, BigQueryError>;

/// The `status` object Google APIs send back in place of a resource
#[derive(Deserialize, Debug)]
pub struct WireStatus {
    pub code: u16,
    pub message: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug)]
pub enum GoogleWireResult<T> {
    Error { error: WireStatus },
    Ok(T),
}

// Buffered through `Value` rather than `#[serde(untagged)]`, which cannot
// read numbers while `arbitrary_precision` is enabled.
impl<'de, T: DeserializeOwned> Deserialize<'de> for GoogleWireResult<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut value = serde_json::Value::deserialize(deserializer)?;
        let error = value.get_mut("error").map(serde_json::Value::take);
        match error {
            Some(error) => serde_json::from_value(error)
                .map(|error| GoogleWireResult::Error { error })
                .map_err(D::Error::custom),
            None => serde_json::from_value(value)
                .map(GoogleWireResult::Ok)
                .map_err(D::Error::custom),
        }
    }
}

impl<T> GoogleWireResult<T> {
    /// Convert from the custom wire format to a standard result
    pub fn into_result(self) -> BigQueryResult<T> {
        match self {
            GoogleWireResult::Error { error } => Err(BigQueryError::ServerError {
                code: error.code,
                status: error.status,
                message: error.message,
            }),
            GoogleWireResult::Ok(t) => Ok(t),
        }
    }
}
