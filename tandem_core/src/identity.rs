//! Participant identity generation.
//!
//! Identities only need to be distinguishable among concurrently active
//! sessions; they are not secrets. All randomness comes from the context so
//! a seeded simulation hands out the same identities on every run.

use tandem_env::{ParticipantId, TandemContext};

use crate::config::{IdentityConfig, IdentityStyle};

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const SHORT_SUFFIX_LEN: u32 = 9;

/// Generates one [`ParticipantId`] per session.
#[derive(Debug, Clone, Default)]
pub struct IdentityProvider {
    config: IdentityConfig,
}

impl IdentityProvider {
    pub fn new(config: IdentityConfig) -> Self {
        Self { config }
    }

    /// Draws a fresh identifier from the context's randomness.
    pub fn generate<Ctx: TandemContext>(&self, ctx: &Ctx) -> ParticipantId {
        let suffix = match self.config.style {
            IdentityStyle::Short => base36_suffix(ctx.random_u64()),
            IdentityStyle::Uuid => {
                let mut bytes = [0u8; 16];
                bytes[..8].copy_from_slice(&ctx.random_u64().to_le_bytes());
                bytes[8..].copy_from_slice(&ctx.random_u64().to_le_bytes());
                uuid::Builder::from_random_bytes(bytes).into_uuid().to_string()
            }
        };

        if self.config.prefix.is_empty() {
            ParticipantId::new(suffix)
        } else {
            ParticipantId::new(format!("{}_{}", self.config.prefix, suffix))
        }
    }
}

fn base36_suffix(mut value: u64) -> String {
    value %= 36u64.pow(SHORT_SUFFIX_LEN);
    let mut out = [b'0'; SHORT_SUFFIX_LEN as usize];
    for slot in out.iter_mut().rev() {
        *slot = BASE36[(value % 36) as usize];
        value /= 36;
    }
    out.iter().map(|&b| b as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualContext;
    use std::collections::HashSet;

    #[test]
    fn test_short_identity_shape() {
        let ctx = ManualContext::new(7);
        let id = IdentityProvider::default().generate(&ctx);

        let (prefix, suffix) = id.as_str().split_once('_').unwrap();
        assert_eq!(prefix, "player");
        assert_eq!(suffix.len(), 9);
        assert!(suffix.bytes().all(|b| BASE36.contains(&b)));
    }

    #[test]
    fn test_identities_do_not_repeat_within_a_run() {
        let ctx = ManualContext::new(99);
        let provider = IdentityProvider::default();

        let ids: HashSet<_> = (0..1000).map(|_| provider.generate(&ctx)).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_same_seed_same_identity() {
        let provider = IdentityProvider::default();
        let a = provider.generate(&ManualContext::new(42));
        let b = provider.generate(&ManualContext::new(42));
        assert_eq!(a, b);
    }

    #[test]
    fn test_uuid_identity() {
        let provider = IdentityProvider::new(IdentityConfig {
            prefix: "guest".to_string(),
            style: IdentityStyle::Uuid,
        });
        let id = provider.generate(&ManualContext::new(3));

        assert!(id.as_str().starts_with("guest_"));
        let uuid = uuid::Uuid::parse_str(id.as_str().strip_prefix("guest_").unwrap()).unwrap();
        assert_eq!(uuid.get_version_num(), 4);
    }

    #[test]
    fn test_base36_padding() {
        assert_eq!(base36_suffix(0), "000000000");
        assert_eq!(base36_suffix(35), "00000000z");
        assert_eq!(base36_suffix(36), "000000010");
    }
}
