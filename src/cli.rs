//! Peer console (C11): a line-oriented front end over [`PeerCore`]'s
//! client operations. The tracker process never runs this loop — it only
//! serves.

use crate::node::PeerCore;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

const HELP: &str = "\
commands:
  write <path> <text>   write text to a file, replicate the change
  read  <path>          print a file's current contents
  ls                     list files known to the tracker
  arch  <path>          archive the current version
  del   <path>          delete a file, fan out to holders
  mv    <src> <dst>     rename a file, fan out to holders
  conn                   (re)connect to the tracker
  disco                  disconnect from the tracker
  help                   show this message
  quit                   disconnect and exit";

/// Read commands from stdin until `quit` or EOF. Returns once the operator
/// asks to exit; does not itself tear down the acceptor.
pub async fn run(peer: Arc<PeerCore>) {
    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "failed reading console input");
                break;
            }
        };

        let mut parts = line.split_whitespace();
        let Some(cmd) = parts.next() else { continue };
        let rest: Vec<&str> = parts.collect();

        match cmd {
            "write" => match rest.split_first() {
                Some((path, text)) => {
                    let data = text.join(" ").into_bytes();
                    match peer.write(path, &data, 0).await {
                        Ok(()) => println!("write: ok"),
                        Err(e) => println!("write: error: {}", e.user_message()),
                    }
                }
                None => println!("usage: write <path> <text>"),
            },
            "read" => match rest.first() {
                Some(path) => match peer.read(path, None, -1).await {
                    Ok(data) => println!("{}", String::from_utf8_lossy(&data)),
                    Err(e) => println!("error: {}", e.user_message()),
                },
                None => println!("usage: read <path>"),
            },
            "ls" => match peer.ls(None).await {
                Ok(files) => {
                    for f in files {
                        println!("{}\tv{}\t{} bytes", f.path, f.latest_version, f.size);
                    }
                }
                Err(e) => println!("error: {}", e.user_message()),
            },
            "arch" => match rest.first() {
                Some(path) => report(peer.archive(path).await, "archive"),
                None => println!("usage: arch <path>"),
            },
            "del" => match rest.first() {
                Some(path) => report(peer.delete(path).await, "delete"),
                None => println!("usage: del <path>"),
            },
            "mv" => match (rest.first(), rest.get(1)) {
                (Some(src), Some(dst)) => report(peer.mv(src, dst).await, "move"),
                _ => println!("usage: mv <src> <dst>"),
            },
            "conn" => report(peer.connect().await, "connect"),
            "disco" => match peer.disconnect(true).await {
                Ok(()) => println!("disconnected"),
                Err(e) => println!("error: {}", e.user_message()),
            },
            "help" => println!("{HELP}"),
            "quit" | "exit" => {
                if let Err(e) = peer.disconnect(true).await {
                    println!("error during disconnect: {}", e.user_message());
                }
                break;
            }
            other => println!("unknown command: {other} (try 'help')"),
        }
    }
    info!("console loop exiting");
}

fn report(result: crate::error::DfsResult<bool>, op: &str) {
    match result {
        Ok(true) => println!("{op}: ok"),
        Ok(false) => println!("{op}: denied"),
        Err(e) => println!("{op}: error: {}", e.user_message()),
    }
}
