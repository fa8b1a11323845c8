//! `u64`-backed id newtypes, declared with [`id_type`].
//!
//! Every identifier that crosses a wire boundary in this workspace (rule,
//! check, proxy, proxy group, host) is one of these rather than a bare
//! `u64`, so a mixed-up argument order is a type error instead of a bug
//! found at 3am.

/// Declares a `Copy` newtype over `u64` with the `Display`/`FromStr`/serde
/// impls every id in this workspace needs.
#[macro_export]
macro_rules! id_type {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            Default,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub const fn new(v: u64) -> Self {
                Self(v)
            }

            pub const fn get(&self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }

        impl From<u64> for $name {
            fn from(v: u64) -> Self {
                Self(v)
            }
        }
    };
}

id_type!(DRuleId);
id_type!(DCheckId);
id_type!(ProxyId);
id_type!(ProxyGroupId);
id_type!(HostId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_display_and_fromstr() {
        let id = DRuleId::new(42);
        let s = id.to_string();
        assert_eq!(s, "42");
        assert_eq!(s.parse::<DRuleId>().unwrap(), id);
    }

    #[test]
    fn ids_of_different_types_do_not_compare() {
        let r = DRuleId::new(1);
        let p = ProxyId::new(1);
        assert_eq!(r.get(), p.get());
        // The point of the newtype: this line would not compile if uncommented.
        // assert_eq!(r, p);
    }
}
