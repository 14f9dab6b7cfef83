//! # xds-sotw CLI
//!
//! Command-line utilities for inspecting a discovery management server.

use anyhow::{Context, Result};
use std::env;
use uuid::Uuid;
use xds_sotw_cli::{render_response, Client};
use xds_sotw_proto::{DiscoveryRequest, Node, ResourceType};

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        "types" => {
            for kind in ResourceType::ALL {
                println!("{:<18} {}", kind.short_name(), kind.type_url());
            }
        }
        "fetch" => {
            if args.len() < 4 {
                eprintln!("Usage: xds-sotw fetch <addr> <type> [names..]");
                std::process::exit(1);
            }
            let client = Client::new(&args[2])?;
            let request = build_request(&args[3], &args[4..])?;
            let response = client.fetch(request).await?;
            print_response(&response)?;
        }
        "watch" => {
            if args.len() < 4 {
                eprintln!("Usage: xds-sotw watch <addr> <type> [names..]");
                std::process::exit(1);
            }
            let client = Client::new(&args[2])?;
            let request = build_request(&args[3], &args[4..])?;
            let mut watch = client.watch(request).await?;

            loop {
                tokio::select! {
                    response = watch.next() => print_response(&response?)?,
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
        "help" | "--help" | "-h" => {
            print_help();
        }
        cmd => {
            eprintln!("Unknown command: {cmd}");
            print_help();
            std::process::exit(1);
        }
    }

    Ok(())
}

fn build_request(kind: &str, names: &[String]) -> Result<DiscoveryRequest> {
    let kind = ResourceType::parse(kind).context("Unknown resource type")?;
    let node_id = env::var("XDS_SOTW_NODE_ID").unwrap_or_else(|_| Uuid::new_v4().to_string());

    Ok(DiscoveryRequest::new(kind.type_url())
        .with_node(Node::new(node_id))
        .with_names(names.iter().cloned()))
}

fn print_response(response: &xds_sotw_proto::DiscoveryResponse) -> Result<()> {
    let rendered = serde_json::to_string_pretty(&render_response(response))?;
    println!("{rendered}");
    Ok(())
}

fn print_help() {
    println!(
        r#"xds-sotw CLI

USAGE:
    xds-sotw <COMMAND> [OPTIONS]

COMMANDS:
    types                          List known resource types
    fetch <addr> <type> [names..]  Fetch resources once
    watch <addr> <type> [names..]  Stream resources, acknowledging each response
    help                           Show this help message

ENVIRONMENT:
    XDS_SOTW_NODE_ID  Node identity sent to the server (default: random)

EXAMPLES:
    xds-sotw types
    xds-sotw fetch localhost:18000 listener
    xds-sotw watch tcp://localhost:18000 cluster backend
"#
    );
}
