use snowflake::SnowflakeIdBucket;
use std::sync::{Mutex, MutexGuard};

static ID_GENERATOR: Mutex<Option<SnowflakeIdBucket>> = Mutex::new(None);

fn lock_generator() -> MutexGuard<'static, Option<SnowflakeIdBucket>> {
    ID_GENERATOR
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Initialize the Snowflake id generator.
///
/// `machine_id` and `node_id` must each be in `0..=31`. Calling this is
/// optional; [`next_id`] falls back to `(1, 1)`.
pub fn init(machine_id: i32, node_id: i32) {
    *lock_generator() = Some(SnowflakeIdBucket::new(machine_id, node_id));
}

/// Generate a Snowflake id in decimal string form. Used for alert and cycle ids.
pub fn next_id() -> String {
    let mut gen = lock_generator();
    let bucket = gen.get_or_insert_with(|| SnowflakeIdBucket::new(1, 1));
    bucket.get_id().to_string()
}
