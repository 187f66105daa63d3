//! Distributed unique-id generator contract used by `schedule()` when the
//! caller omits `job.id`, and by bootstrap jobs.

use uuid::Uuid;

/// Generates external job ids. The default implementation is UUIDv4-backed;
/// the trait exists so a deployment can swap in a Snowflake-style or
/// database-sequence generator without touching the Claim Engine.
pub trait JobIdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UuidJobIdGenerator;

impl JobIdGenerator for UuidJobIdGenerator {
    fn generate(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Stable hash of a job's external id, used as the record's primary `id`.
pub fn hash_job_id(job_type: &str, external_id: &str) -> String {
    use std::hash::{Hash, Hasher};
    // FNV-1a: deterministic across runs and processes, unlike SipHash's
    // randomized default hasher, which this primary key requires.
    struct Fnv1a(u64);
    impl Hasher for Fnv1a {
        fn write(&mut self, bytes: &[u8]) {
            for &b in bytes {
                self.0 ^= b as u64;
                self.0 = self.0.wrapping_mul(0x100000001b3);
            }
        }
        fn finish(&self) -> u64 {
            self.0
        }
    }

    let mut hasher = Fnv1a(0xcbf29ce484222325);
    job_type.hash(&mut hasher);
    0u8.hash(&mut hasher);
    external_id.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_generator_produces_distinct_ids() {
        let gen = UuidJobIdGenerator;
        assert_ne!(gen.generate(), gen.generate());
    }

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(hash_job_id("email:send", "job-1"), hash_job_id("email:send", "job-1"));
    }

    #[test]
    fn hash_distinguishes_type_and_id() {
        assert_ne!(hash_job_id("email:send", "job-1"), hash_job_id("email:remind", "job-1"));
        assert_ne!(hash_job_id("email:send", "job-1"), hash_job_id("email:send", "job-2"));
    }
}
