//! Consistent-hash bucketing.
//!
//! A bucket is a deterministic value in `[0, 1)` derived from a flag salt and a subject id. It
//! drives both percentage rollouts and variant partitioning, so it must never depend on time,
//! process, or snapshot.
use md5;

pub trait Sharder {
    /// Return the bucket of `subject_id` under `salt`, in `[0, 1)`.
    fn bucket_of(&self, salt: &str, subject_id: &str) -> f64;
}

impl<T: Sharder + ?Sized> Sharder for &T {
    fn bucket_of(&self, salt: &str, subject_id: &str) -> f64 {
        (**self).bucket_of(salt, subject_id)
    }
}

/// The default sharder: MD5 of `"{salt}:{subject_id}"`, first four bytes read as a big-endian
/// `u32` and scaled down by `2^32`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Md5Sharder;

impl Sharder for Md5Sharder {
    fn bucket_of(&self, salt: &str, subject_id: &str) -> f64 {
        let hash = md5::compute(format!("{salt}:{subject_id}"));
        let value = u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]]);
        f64::from(value) / 4_294_967_296.0
    }
}

/// Sharder returning preconfigured buckets keyed by subject id. Unknown subjects get `0.0`.
#[cfg(test)]
pub(crate) struct DeterministicSharder(pub std::collections::HashMap<String, f64>);

#[cfg(test)]
impl DeterministicSharder {
    pub fn new<'a>(buckets: impl IntoIterator<Item = (&'a str, f64)>) -> Self {
        DeterministicSharder(
            buckets
                .into_iter()
                .map(|(subject, bucket)| (subject.to_owned(), bucket))
                .collect(),
        )
    }
}

#[cfg(test)]
impl Sharder for DeterministicSharder {
    fn bucket_of(&self, _salt: &str, subject_id: &str) -> f64 {
        self.0.get(subject_id).copied().unwrap_or(0.0)
    }
}
