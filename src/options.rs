use rand::Rng;

/// Server configuration, fixed after boot. `master_replid` is generated
/// once on a master and left empty on a replica.
#[derive(Clone, Debug)]
pub struct ServerOptions {
    pub host: String,
    pub port: u16,
    pub dir: Option<String>,
    pub dbfilename: Option<String>,
    pub replica_of: Option<(String, u16)>,
    pub master_replid: String,
}

impl ServerOptions {
    pub fn is_replica(&self) -> bool {
        self.replica_of.is_some()
    }

    pub fn config_get(&self, key: &str) -> String {
        match key {
            "dir" => self.dir.clone().unwrap_or_default(),
            "dbfilename" => self.dbfilename.clone().unwrap_or_default(),
            "port" => self.port.to_string(),
            _ => String::new(),
        }
    }
}

#[derive(Clone, Copy)]
enum ArgState {
    Normal,
    Port,
    Dir,
    DbFilename,
    ReplicaOf,
}

pub fn parse_args(args: impl Iterator<Item = String>) -> ServerOptions {
    let mut state = ArgState::Normal;
    let mut port: Option<u16> = None;
    let mut dir: Option<String> = None;
    let mut dbfilename: Option<String> = None;
    let mut replica_of: Option<(String, u16)> = None;

    for arg in args {
        match (state, arg.as_str()) {
            (ArgState::Normal, "--port") => state = ArgState::Port,
            (ArgState::Normal, "--dir") => state = ArgState::Dir,
            (ArgState::Normal, "--dbfilename") => state = ArgState::DbFilename,
            (ArgState::Normal, "--replicaof") => state = ArgState::ReplicaOf,
            (ArgState::Port, value) => {
                port = value.parse().ok();
                state = ArgState::Normal;
            }
            (ArgState::Dir, value) => {
                dir = Some(value.to_string());
                state = ArgState::Normal;
            }
            (ArgState::DbFilename, value) => {
                dbfilename = Some(value.to_string());
                state = ArgState::Normal;
            }
            (ArgState::ReplicaOf, value) => {
                replica_of = parse_replica_of(value);
                state = ArgState::Normal;
            }
            (_, value) => {
                tracing::warn!("ignoring invalid argument: {}", value)
            }
        }
    }

    let master_replid = match replica_of {
        Some(_) => String::new(),
        None => generate_replid(),
    };

    ServerOptions {
        host: DEFAULT_HOST.to_string(),
        port: port.unwrap_or(DEFAULT_PORT),
        dir,
        dbfilename,
        replica_of,
        master_replid,
    }
}

// --replicaof takes a single "host port" argument.
fn parse_replica_of(value: &str) -> Option<(String, u16)> {
    let mut parts = value.split_whitespace();
    let host = parts.next()?.to_string();
    let port = parts.next()?.parse().ok()?;
    Some((host, port))
}

fn generate_replid() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    (0..40)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

static DEFAULT_HOST: &str = "127.0.0.1";
static DEFAULT_PORT: u16 = 6379;
