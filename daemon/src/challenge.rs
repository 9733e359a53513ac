//! Liveness challenges sent to game servers in `getinfo`

use rand::Rng;
use serde::Deserialize;

pub const MIN_LEN: usize = 9;
pub const MAX_LEN: usize = 12;

/// Characters that delimit fields elsewhere in the protocol
const RESERVED: &[u8] = b"\\;\"%/";

/// Draw a fresh challenge: `MIN_LEN..=MAX_LEN` printable ASCII characters, none of them reserved
pub fn generate<R: Rng>(rng: &mut R) -> String {
    let len = rng.random_range(MIN_LEN..=MAX_LEN);
    (0..len)
        .map(|_| loop {
            let c = rng.random_range(33u8..=126);
            if !RESERVED.contains(&c) {
                break char::from(c);
            }
        })
        .collect()
}

/// Whether an info response must echo the challenge issued to its connection
#[derive(Deserialize, Debug, Default, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChallengePolicy {
    #[default]
    Permissive,
    Strict,
}

impl ChallengePolicy {
    /// Check an info response's echoed challenge against the one outstanding for its connection
    pub fn admits(self, outstanding: Option<&str>, echoed: Option<&[u8]>) -> bool {
        match self {
            ChallengePolicy::Permissive => true,
            ChallengePolicy::Strict => match (outstanding, echoed) {
                (Some(expected), Some(echoed)) => expected.as_bytes() == echoed,
                _ => false,
            },
        }
    }
}
