use clap::Parser;

/// LoRaWAN network server: terminates the Semtech packet-forwarder UDP
/// protocol, validates and decrypts uplinks and hands the payloads to the
/// application back-end.
#[derive(Debug, Parser)]
#[command(name = "lorahub", version)]
pub struct Config {
    /// Port to bind to for incoming (UDP) gateway packets.
    #[arg(long, env = "GW_PORT", default_value_t = 1680)]
    pub gw_port: u16,

    /// Port to bind to for the admin api (HTTP).
    #[arg(long, env = "ADMIN_PORT", default_value_t = 8000)]
    pub admin_port: u16,

    /// hostname:port of the Redis server.
    #[arg(long, env = "REDIS_SERVER", default_value = "localhost:6379")]
    pub redis_server: String,

    /// Password of the Redis server.
    #[arg(long, env = "REDIS_PASSWORD", default_value = "")]
    pub redis_password: String,
}
