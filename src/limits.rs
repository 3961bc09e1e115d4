/// Max byte length of a guest name or unit id.
pub const MAX_IDENTITY_LEN: usize = 256;

/// Longest stay, including extensions.
pub const MAX_STAY_NIGHTS: u32 = 3650;

/// Pending appends the WAL writer channel buffers before senders wait.
pub const WAL_CHANNEL_CAPACITY: usize = 4096;
