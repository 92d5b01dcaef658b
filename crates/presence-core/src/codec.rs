//! Signature extraction and the persisted signature format.
//!
//! Extraction is pluggable: the decision logic only ever sees a
//! [`Signature`], so a hash stub and a real face-embedding model can be
//! swapped without touching matching or attendance rules.

use crate::types::{Signature, SignatureError};
use base64::Engine as _;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::process::{Command, Stdio};
use thiserror::Error;

/// Number of features produced by [`HashExtractor`].
pub const HASH_SIGNATURE_LEN: usize = 16;

/// Argument placeholder replaced with the image path by [`CommandExtractor`].
pub const IMAGE_PLACEHOLDER: &str = "{image}";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractError {
    #[error("no face detected in image: {0}")]
    NotAFace(String),
    #[error("extractor failed: {0}")]
    Backend(String),
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("malformed stored signature: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Turns raw image bytes into a signature.
pub trait SignatureExtractor: Send + Sync {
    /// Short name for logs and status output.
    fn name(&self) -> &'static str;

    fn extract(&self, image: &[u8]) -> Result<Signature, ExtractError>;
}

/// Content-hash signature: identical bytes give identical signatures.
///
/// This does not look at faces at all. Any non-empty payload yields a
/// signature, and two different photos of the same person will not match.
pub struct HashExtractor;

impl SignatureExtractor for HashExtractor {
    fn name(&self) -> &'static str {
        "hash"
    }

    fn extract(&self, image: &[u8]) -> Result<Signature, ExtractError> {
        if image.is_empty() {
            return Err(ExtractError::NotAFace("empty image payload".into()));
        }

        let digest = Sha256::digest(image);
        let values = digest
            .iter()
            .take(HASH_SIGNATURE_LEN)
            .map(|&b| f32::from(b) / 255.0)
            .collect();

        Signature::new(values).map_err(|e| ExtractError::Backend(e.to_string()))
    }
}

/// JSON printed by an external extractor program.
#[derive(Deserialize)]
struct ExtractorOutput {
    success: bool,
    #[serde(default)]
    encoding: Vec<f32>,
    #[serde(default)]
    error: Option<String>,
}

/// Runs an external program to compute the signature.
///
/// The image is written to a temporary file whose path replaces every
/// `{image}` argument (or is appended when no placeholder is given). The
/// program must print `{"success": true, "encoding": [...]}` with values in
/// [0, 1], or `{"success": false, "error": "..."}` when it finds no face.
pub struct CommandExtractor {
    program: String,
    args: Vec<String>,
}

impl CommandExtractor {
    /// Build from an argv list; the first element is the program.
    pub fn new(argv: &[String]) -> Result<Self, ExtractError> {
        let (program, rest) = argv
            .split_first()
            .ok_or_else(|| ExtractError::Backend("extractor command is empty".into()))?;

        let mut args = rest.to_vec();
        if !args.iter().any(|a| a.contains(IMAGE_PLACEHOLDER)) {
            args.push(IMAGE_PLACEHOLDER.to_string());
        }

        Ok(Self {
            program: program.clone(),
            args,
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl SignatureExtractor for CommandExtractor {
    fn name(&self) -> &'static str {
        "command"
    }

    fn extract(&self, image: &[u8]) -> Result<Signature, ExtractError> {
        if image.is_empty() {
            return Err(ExtractError::NotAFace("empty image payload".into()));
        }

        let mut file = tempfile::NamedTempFile::new()
            .map_err(|e| ExtractError::Backend(format!("temporary image file: {e}")))?;
        file.write_all(image)
            .and_then(|_| file.flush())
            .map_err(|e| ExtractError::Backend(format!("temporary image file: {e}")))?;
        let path = file.path().to_string_lossy().into_owned();

        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| a.replace(IMAGE_PLACEHOLDER, &path))
            .collect();

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ExtractError::Backend(format!("failed to run {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractError::Backend(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let parsed: ExtractorOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| ExtractError::Backend(format!("unparsable extractor output: {e}")))?;

        if !parsed.success {
            return Err(ExtractError::NotAFace(
                parsed.error.unwrap_or_else(|| "no face found in image".into()),
            ));
        }

        tracing::debug!(
            program = %self.program,
            dims = parsed.encoding.len(),
            "external extractor produced signature"
        );

        Signature::new(parsed.encoding).map_err(|e: SignatureError| {
            ExtractError::Backend(format!("extractor produced an invalid signature: {e}"))
        })
    }
}

/// Serialize a signature to its stored text form (a JSON array).
pub fn encode_signature(signature: &Signature) -> String {
    // A Vec<f32> of finite values always serializes.
    serde_json::to_string(signature.values()).unwrap_or_else(|_| "[]".into())
}

/// Parse a stored signature, re-validating its values.
pub fn decode_signature(text: &str) -> Result<Signature, CodecError> {
    Ok(serde_json::from_str(text)?)
}

/// Decode a base64 image payload, accepting an optional `data:` URI prefix.
pub fn decode_image_payload(payload: &str) -> Result<Vec<u8>, ExtractError> {
    let payload = payload.trim();
    let encoded = match payload.strip_prefix("data:") {
        Some(uri) => uri
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or_else(|| ExtractError::NotAFace("data URI has no payload".into()))?,
        None => payload,
    };

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| ExtractError::NotAFace(format!("image payload is not valid base64: {e}")))?;

    if bytes.is_empty() {
        return Err(ExtractError::NotAFace("empty image payload".into()));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_extractor_deterministic() {
        let a = HashExtractor.extract(b"same image bytes").unwrap();
        let b = HashExtractor.extract(b"same image bytes").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), HASH_SIGNATURE_LEN);
        assert_eq!(a.similarity(&b), 1.0);
    }

    #[test]
    fn test_hash_extractor_differs_for_different_bytes() {
        let a = HashExtractor.extract(b"photo one").unwrap();
        let b = HashExtractor.extract(b"photo two").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_extractor_empty_is_not_a_face() {
        assert!(matches!(
            HashExtractor.extract(&[]),
            Err(ExtractError::NotAFace(_))
        ));
    }

    #[test]
    fn test_signature_text_round_trip() {
        let sig = HashExtractor.extract(b"\x89PNG fake image").unwrap();
        let text = encode_signature(&sig);
        assert!(text.starts_with('['));
        assert_eq!(decode_signature(&text).unwrap(), sig);
    }

    #[test]
    fn test_decode_signature_rejects_garbage() {
        assert!(decode_signature("not json").is_err());
        assert!(decode_signature("[0.5, 7.0]").is_err());
    }

    #[test]
    fn test_decode_image_payload_plain() {
        assert_eq!(decode_image_payload("aGVsbG8=").unwrap(), b"hello");
    }

    #[test]
    fn test_decode_image_payload_data_uri() {
        let bytes = decode_image_payload("data:image/png;base64,aGVsbG8=").unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[test]
    fn test_decode_image_payload_rejects_invalid() {
        assert!(matches!(
            decode_image_payload("***"),
            Err(ExtractError::NotAFace(_))
        ));
        assert!(matches!(
            decode_image_payload(""),
            Err(ExtractError::NotAFace(_))
        ));
        assert!(matches!(
            decode_image_payload("data:image/png;base64"),
            Err(ExtractError::NotAFace(_))
        ));
    }

    #[test]
    fn test_command_extractor_requires_program() {
        assert!(CommandExtractor::new(&[]).is_err());
    }

    #[test]
    fn test_command_extractor_appends_placeholder() {
        let ex = CommandExtractor::new(&["encode-face".to_string()]).unwrap();
        assert_eq!(ex.program(), "encode-face");
        assert_eq!(ex.args, vec![IMAGE_PLACEHOLDER.to_string()]);
    }

    #[cfg(unix)]
    fn sh(script: &str) -> CommandExtractor {
        CommandExtractor::new(&[
            "sh".to_string(),
            "-c".to_string(),
            script.to_string(),
            "extractor".to_string(),
            IMAGE_PLACEHOLDER.to_string(),
        ])
        .unwrap()
    }

    #[cfg(unix)]
    #[test]
    fn test_command_extractor_success() {
        // The script checks it was handed a readable file.
        let ex = sh(r#"test -s "$1" && echo '{"success": true, "encoding": [0.25, 0.5, 1.0]}'"#);
        let sig = ex.extract(b"image").unwrap();
        assert_eq!(sig.values(), &[0.25, 0.5, 1.0]);
    }

    #[cfg(unix)]
    #[test]
    fn test_command_extractor_no_face() {
        let ex = sh(r#"echo '{"success": false, "error": "No face found in image"}'"#);
        assert_eq!(
            ex.extract(b"image"),
            Err(ExtractError::NotAFace("No face found in image".into()))
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_command_extractor_failures_are_backend_errors() {
        for script in [
            "exit 3",
            "echo not-json",
            r#"echo '{"success": true, "encoding": [-0.2, 0.1]}'"#,
        ] {
            assert!(
                matches!(sh(script).extract(b"image"), Err(ExtractError::Backend(_))),
                "script {script:?} should fail as backend error"
            );
        }
    }

    #[test]
    fn test_command_extractor_missing_program() {
        let ex = CommandExtractor::new(&["/nonexistent/presence-extractor".to_string()]).unwrap();
        assert!(matches!(ex.extract(b"image"), Err(ExtractError::Backend(_))));
    }
}
