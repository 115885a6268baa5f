//! vncache-ctl — command-line client for a VNCache node.

use anyhow::{bail, Context, Result};

mod cmd;

use cmd::config::Config;

const DEFAULT_ALG: &str = "ecdsa-p256-sha256";

fn print_usage() {
    println!("Usage: vncache-ctl --url <http(s)://host:port> --key <priv.pem> --server-key <pub.pem> [options] <command>");
    println!();
    println!("Objects");
    println!("  get <id>                        Print an object's payload to stdout");
    println!("  set <id> <file>                 Store a file's contents under <id>");
    println!("  set <id> -                      Store stdin's contents under <id>");
    println!("  rename <id> <new-id> [file]     Rename <id> to <new-id>, optionally replacing its data");
    println!("  delete <id>                     Delete an object");
    println!("  dequeue                         Stream change events as they arrive");
    println!();
    println!("Membership");
    println!("  advertisement                   Show this node's self-advertisement");
    println!("  discover                        Show this node's current peer view");
    println!();
    println!("Options:");
    println!("  --url <url>                     Node base URL, e.g. http://127.0.0.1:9443");
    println!("  --connect-path <path>           Upgrade handshake path (required for object/dequeue commands)");
    println!("  --well-known-path <path>        Self-advertisement path (required for `advertisement`)");
    println!("  --discovery-path <path>         Peer membership path (required for `discover`)");
    println!("  --key <path>                    This caller's private key (PKCS#8 PEM)");
    println!("  --server-key <path>             The node's public key (PEM)");
    println!("  --alg <alg>                     rsa-pkcs1-sha256 | ecdsa-p256-sha256 (default: {DEFAULT_ALG})");
    println!("  --peer <node-id>                Identify as a peer node rather than an ordinary client");
    println!();
    println!("Examples:");
    println!("  vncache-ctl --url http://127.0.0.1:9443 --connect-path /connect \\");
    println!("      --key client.pem --server-key node.pub.pem set session-42 payload.bin");
    println!("  vncache-ctl --url http://127.0.0.1:9443 --well-known-path /.well-known/vncache \\");
    println!("      --key client.pem --server-key node.pub.pem advertisement");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut url = None;
    let mut connect_path = None;
    let mut well_known_path = None;
    let mut discovery_path = None;
    let mut key_path = None;
    let mut server_key_path = None;
    let mut alg = DEFAULT_ALG.to_string();
    let mut peer_id = None;
    let mut remaining: Vec<String> = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--url" => {
                i += 1;
                url = Some(args.get(i).context("--url requires a value")?.clone());
            }
            "--connect-path" => {
                i += 1;
                connect_path = Some(args.get(i).context("--connect-path requires a value")?.clone());
            }
            "--well-known-path" => {
                i += 1;
                well_known_path = Some(args.get(i).context("--well-known-path requires a value")?.clone());
            }
            "--discovery-path" => {
                i += 1;
                discovery_path = Some(args.get(i).context("--discovery-path requires a value")?.clone());
            }
            "--key" => {
                i += 1;
                key_path = Some(args.get(i).context("--key requires a value")?.clone());
            }
            "--server-key" => {
                i += 1;
                server_key_path = Some(args.get(i).context("--server-key requires a value")?.clone());
            }
            "--alg" => {
                i += 1;
                alg = args.get(i).context("--alg requires a value")?.clone();
            }
            "--peer" => {
                i += 1;
                peer_id = Some(args.get(i).context("--peer requires a value")?.clone());
            }
            other => remaining.push(other.to_string()),
        }
        i += 1;
    }

    let remaining_refs: Vec<&str> = remaining.iter().map(|s| s.as_str()).collect();

    if matches!(remaining_refs.as_slice(), ["help"] | ["--help"] | ["-h"] | []) {
        print_usage();
        return Ok(());
    }

    let config = Config {
        url: url.context("--url is required")?,
        connect_path: connect_path.unwrap_or_default(),
        well_known_path,
        discovery_path,
        key_path: key_path.context("--key is required")?,
        server_key_path: server_key_path.context("--server-key is required")?,
        alg,
        peer_id,
    };

    match remaining_refs.as_slice() {
        ["get", id] => cmd::object::cmd_get(&config, id).await,
        ["set", id, path] => cmd::object::cmd_set(&config, id, path).await,
        ["rename", id, new_id] => cmd::object::cmd_rename(&config, id, new_id, None).await,
        ["rename", id, new_id, path] => cmd::object::cmd_rename(&config, id, new_id, Some(path)).await,
        ["delete", id] => cmd::object::cmd_delete(&config, id).await,
        ["dequeue"] => cmd::object::cmd_dequeue(&config).await,
        ["advertisement"] => cmd::discovery::cmd_advertisement(&config).await,
        ["discover"] => cmd::discovery::cmd_discover(&config).await,
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            bail!("unknown command");
        }
    }
}
