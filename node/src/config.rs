#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    pub public_addr: Option<String>,
    pub bootstrap_peers: Vec<String>,
    pub rendezvous: String,
    pub profile: Vec<String>,
    pub load_file: Option<String>,
    pub save_file: Option<String>,
    pub test_file: Option<String>,
    pub sync_interval_secs: u64,
}
