//! Source-control trigger handling — webhook signature validation and
//! push-event parsing.

use hmac::{Hmac, Mac};
use secpipe_engine::model::run::RunTrigger;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Validate a webhook signature (X-Hub-Signature-256).
pub fn validate_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    if secret.is_empty() {
        tracing::warn!("Webhook secret not configured, skipping validation");
        return true;
    }

    let sig = signature.strip_prefix("sha256=").unwrap_or(signature);
    let sig_bytes = match hex::decode(sig) {
        Ok(b) => b,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(payload);

    mac.verify_slice(&sig_bytes).is_ok()
}

/// Extract a run trigger from a push-event payload. `None` when the
/// payload is not a deployable push (tag deletion, empty sha).
pub fn parse_push(payload: &serde_json::Value) -> Option<RunTrigger> {
    let repo = payload["repository"]["full_name"].as_str().unwrap_or_default();
    let commit_sha = payload["after"].as_str().unwrap_or_default();
    let branch = payload["ref"]
        .as_str()
        .unwrap_or_default()
        .strip_prefix("refs/heads/")
        .unwrap_or_default();
    let author = payload["pusher"]["name"].as_str().map(|s| s.to_string());
    let message = payload["head_commit"]["message"]
        .as_str()
        .map(|s| s.to_string());

    if commit_sha.is_empty() || branch.is_empty() || commit_sha.chars().all(|c| c == '0') {
        return None;
    }

    Some(RunTrigger {
        repo: repo.to_string(),
        branch: branch.to_string(),
        commit_sha: commit_sha.to_string(),
        author,
        message,
        fingerprint: format!("{commit_sha}-{branch}-push"),
        event: "push".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn accepts_valid_signature_and_rejects_tampering() {
        let payload = br#"{"ref":"refs/heads/main"}"#;
        let sig = sign("s3cret", payload);
        assert!(validate_signature("s3cret", payload, &sig));
        assert!(!validate_signature("s3cret", b"tampered", &sig));
        assert!(!validate_signature("s3cret", payload, "sha256=deadbeef"));
        assert!(!validate_signature("s3cret", payload, "not-hex"));
    }

    #[test]
    fn empty_secret_skips_validation() {
        assert!(validate_signature("", b"anything", "whatever"));
    }

    #[test]
    fn parses_push_payload() {
        let payload = serde_json::json!({
            "repository": { "full_name": "org/crud-api" },
            "ref": "refs/heads/main",
            "after": "abc123def456",
            "pusher": { "name": "dev" },
            "head_commit": { "message": "fix: validation" },
        });
        let trigger = parse_push(&payload).unwrap();
        assert_eq!(trigger.branch, "main");
        assert_eq!(trigger.commit_sha, "abc123def456");
        assert_eq!(trigger.fingerprint, "abc123def456-main-push");
        assert_eq!(trigger.author.as_deref(), Some("dev"));
    }

    #[test]
    fn ignores_branch_deletion() {
        let payload = serde_json::json!({
            "repository": { "full_name": "org/crud-api" },
            "ref": "refs/heads/old-branch",
            "after": "0000000000000000000000000000000000000000",
        });
        assert!(parse_push(&payload).is_none());
    }

    #[test]
    fn ignores_tag_pushes() {
        let payload = serde_json::json!({
            "repository": { "full_name": "org/crud-api" },
            "ref": "refs/tags/v1.0.0",
            "after": "abc123",
        });
        assert!(parse_push(&payload).is_none());
    }
}
