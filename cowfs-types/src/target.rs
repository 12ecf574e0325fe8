//! Compact target encoding (§4.1 `parse_target`, §9 "Global mutable
//! state"). A target is either "no preference", a specific device, or a
//! disk-group label; the original bcachefs source packs this into one
//! `u32` with the high bits naming the kind (`dev_to_target`/
//! `group_to_target` in the upstream `bch2_format` wrapper). We keep the
//! same numeric scheme so on-disk target fields round-trip byte for byte
//! but expose it to Rust callers as a typed enum instead of raw bits.

const DEV_START: u32 = 1;
const GROUP_START: u32 = 256 + DEV_START;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Null,
    Dev(u32),
    Group(u32),
}

impl Target {
    pub fn encode(self) -> u32 {
        match self {
            Target::Null => 0,
            Target::Dev(idx) => DEV_START + idx,
            Target::Group(idx) => GROUP_START + idx,
        }
    }

    pub fn decode(raw: u32) -> Self {
        if raw == 0 {
            Target::Null
        } else if raw < GROUP_START {
            Target::Dev(raw - DEV_START)
        } else {
            Target::Group(raw - GROUP_START)
        }
    }
}

impl From<Target> for u32 {
    fn from(t: Target) -> u32 {
        t.encode()
    }
}

impl From<u32> for Target {
    fn from(raw: u32) -> Target {
        Target::decode(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        for t in [Target::Null, Target::Dev(0), Target::Dev(7), Target::Group(0), Target::Group(3)] {
            assert_eq!(Target::decode(t.encode()), t);
        }
    }

    #[test]
    fn dev_and_group_ranges_do_not_overlap() {
        assert_ne!(Target::Dev(254).encode(), Target::Group(0).encode());
    }
}
