pub mod network {
    pub const SSH_DEFAULT_PORT: u16 = 22;
    pub const CONNECT_TIMEOUT_SECS: u64 = 30;
    pub const EXEC_DEFAULT_TIMEOUT_SECS: u64 = 30;
    pub const EXEC_HARD_GRACE_MS: u64 = 2_000;
    pub const KEEPALIVE_INTERVAL_SECS: u64 = 30;
    pub const HEARTBEAT_INTERVAL_SECS: u64 = 60;
    pub const ALIVE_PROBE_TIMEOUT_MS: u32 = 1_000;
    pub const KEEPALIVE_MAX_FAILS: u32 = 3;

    /// Modern key-exchange algorithms, most preferred first.
    pub const KEX_ALGORITHMS: &str = "curve25519-sha256,curve25519-sha256@libssh.org,\
ecdh-sha2-nistp256,ecdh-sha2-nistp384,ecdh-sha2-nistp521,\
diffie-hellman-group14-sha256,diffie-hellman-group16-sha512";

    /// Modern ciphers, most preferred first.
    pub const CIPHERS: &str = "chacha20-poly1305@openssh.com,\
aes128-gcm@openssh.com,aes256-gcm@openssh.com,\
aes128-ctr,aes192-ctr,aes256-ctr";
}

pub mod session {
    pub const MAX_SESSIONS: usize = 100;
    pub const MAX_SESSIONS_PER_HOST: usize = 10;
    pub const SESSION_TIMEOUT_SECS: u64 = 30 * 60;
    pub const IDLE_TIMEOUT_SECS: u64 = 10 * 60;
    pub const CLEANUP_INTERVAL_SECS: u64 = 60;
    pub const MAX_HISTORY: usize = 100;
    pub const MAX_GENERATED_ALIAS: usize = 1_000;
}

pub mod shell {
    pub const DEFAULT_TERM: &str = "xterm-256color";
    pub const DEFAULT_ROWS: u16 = 40;
    pub const DEFAULT_COLS: u16 = 160;
    pub const READ_CHUNK_BYTES: usize = 4096;
    pub const READ_POLL_MS: u64 = 30;
    pub const DEFAULT_READ_TIMEOUT_MS: u64 = 100;
    pub const TTY_SPEED: u32 = 14400;
    /// Cursor save + restore, invisible on the remote terminal.
    pub const HEARTBEAT_SEQUENCE: &[u8] = b"\x1b[s\x1b[u";
}

pub mod limits {
    pub const MAX_PORT: u16 = 65_535;
    pub const MIN_PORT: u16 = 1;
}
