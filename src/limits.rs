/// Largest party the engine accepts.
pub const MAX_PARTY_SIZE: u32 = 100;
/// Restaurant, sector, table and customer names.
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_NOTES_LEN: usize = 2048;
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 256;
/// Client-chosen catalog ids.
pub const MAX_ID_LEN: usize = 128;
pub const MAX_CONTACT_LEN: usize = 256;
pub const MAX_SHIFTS_PER_RESTAURANT: usize = 16;
pub const MAX_TABLES_PER_SECTOR: usize = 1_000;

pub const MAX_TENANTS: usize = 1_000;
pub const MAX_TENANT_NAME_LEN: usize = 128;
