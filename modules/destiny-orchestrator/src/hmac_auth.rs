//! Robot request authentication (spec §5). Every robot-facing endpoint is
//! signed the same way: `hex(HMAC-SHA256(key, "{robot_id}.{timestamp}.{body}"))`
//! carried in a header alongside the robot id and timestamp, checked against
//! a short replay window. Same signing primitives the teacher's session
//! cookies use (`hmac`/`sha2`, hex-encoded), swapped to sign a request body
//! instead of a cookie payload, and compared with `subtle` instead of a
//! hand-rolled fold — this crate is a new trust boundary, not an admin
//! cookie, so a reviewed constant-time comparison earns its dependency.

use chrono::Utc;
use destiny_common::{DestinyError, Result, Robot};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::state::OrchestratorDeps;

type HmacSha256 = Hmac<Sha256>;

pub const ROBOT_ID_HEADER: &str = "x-destiny-robot-id";
pub const TIMESTAMP_HEADER: &str = "x-destiny-timestamp";
pub const SIGNATURE_HEADER: &str = "x-destiny-signature";

/// Verifies a robot's signed request and returns the authenticated `Robot`.
/// `body` is the exact bytes the robot signed.
///
/// The robot's long-term signing key is `sha256(one-time plaintext secret)`,
/// the same hash DESTINY stored at issuance (`Robot::client_secret_hash`) —
/// neither party needs the plaintext secret again after rotation.
pub async fn verify_robot_request(
    deps: &OrchestratorDeps,
    robot_id: Uuid,
    timestamp: &str,
    signature_hex: &str,
    body: &[u8],
) -> Result<Robot> {
    let robot = deps
        .store
        .get_robot(robot_id)
        .await?
        .ok_or_else(|| DestinyError::Validation(format!("unknown robot {robot_id}")))?;

    let ts: i64 = timestamp
        .parse()
        .map_err(|_| DestinyError::Validation("timestamp header is not a unix seconds integer".to_string()))?;
    let now = Utc::now().timestamp();
    if (now - ts).abs() > deps.replay_window_secs {
        return Err(DestinyError::Validation("request timestamp outside replay window".to_string()));
    }

    let payload = format!("{robot_id}.{timestamp}.");
    let mut mac = HmacSha256::new_from_slice(robot.client_secret_hash.as_bytes())
        .map_err(|e| DestinyError::Validation(format!("invalid signing key: {e}")))?;
    mac.update(payload.as_bytes());
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());

    if expected.as_bytes().ct_eq(signature_hex.as_bytes()).unwrap_u8() != 1 {
        return Err(DestinyError::Validation("signature mismatch".to_string()));
    }

    Ok(robot)
}

/// Hashes a one-time plaintext secret into the value stored as
/// `Robot::client_secret_hash` and used directly as HMAC key material. The
/// robot derives the same value client-side at issuance or rotation time —
/// after that, the plaintext secret is never needed by either side again.
pub fn hash_secret(plaintext: &str) -> String {
    let digest = Sha256::digest(plaintext.as_bytes());
    hex::encode(digest)
}
