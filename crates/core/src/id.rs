//! Record identities and how drivers mint them.

use core::fmt::{Debug, Display};
use core::hash::Hash;

use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

/// Identity attribute type of an entity.
///
/// Drivers call [`Identity::generate`] when inserting a record that has no
/// identity yet, passing the highest identity they have issued so far.
/// `None` means the identity space is exhausted after `last`.
pub trait Identity:
    Clone + Eq + Hash + Debug + Display + Serialize + DeserializeOwned + Send + Sync + 'static
{
    fn generate(last: Option<&Self>) -> Option<Self>;

    /// Stable string key used by drivers to index records.
    fn key(&self) -> String {
        self.to_string()
    }
}

macro_rules! impl_sequence_identity {
    ($($t:ty),*) => {
        $(
            impl Identity for $t {
                fn generate(last: Option<&Self>) -> Option<Self> {
                    match last {
                        Some(v) => v.checked_add(1),
                        None => Some(1),
                    }
                }
            }
        )*
    };
}

impl_sequence_identity!(u32, u64, i32, i64);

impl Identity for Uuid {
    /// UUIDv7 (time-ordered); `last` is ignored.
    fn generate(_last: Option<&Self>) -> Option<Self> {
        Some(Uuid::now_v7())
    }
}

impl Identity for String {
    fn generate(_last: Option<&Self>) -> Option<Self> {
        Some(Uuid::now_v7().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequences_start_at_one_and_increment() {
        assert_eq!(u64::generate(None), Some(1));
        assert_eq!(u64::generate(Some(&41)), Some(42));
        assert_eq!(i64::generate(Some(&-1)), Some(0));
    }

    #[test]
    fn sequences_stop_at_the_maximum() {
        assert_eq!(u32::generate(Some(&u32::MAX)), None);
        assert_eq!(i32::generate(Some(&i32::MAX)), None);
        assert_eq!(u64::generate(Some(&u64::MAX)), None);
        assert_eq!(i64::generate(Some(&i64::MAX)), None);
        assert_eq!(i64::generate(Some(&(i64::MAX - 1))), Some(i64::MAX));
    }

    #[test]
    fn uuids_are_fresh() {
        let a = Uuid::generate(None).unwrap();
        let b = Uuid::generate(Some(&a)).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.key(), a.to_string());
    }
}
