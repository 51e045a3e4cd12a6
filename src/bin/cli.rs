//! CLI for talking to a causalkv cluster

use causalkv::common::node_url;
use causalkv::replication::protocol::kvs_path;
use clap::{Parser, Subcommand};
use reqwest::Method;
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "causalkv")]
#[command(about = "causalkv client")]
#[command(version)]
struct Cli {
    /// Node to talk to (host:port)
    #[arg(long, default_value = "localhost:8090")]
    node: String,

    /// Causal metadata from a previous response (JSON object)
    #[arg(long, global = true)]
    metadata: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read a key
    Get { key: String },

    /// Write a key; the value is parsed as JSON, or taken as a string
    Put { key: String, value: String },

    /// Delete a key
    Delete { key: String },

    /// Show the view
    View,

    /// List shard ids
    ShardIds,

    /// This node's shard
    NodeShard,

    /// Members of a shard
    Members { id: usize },

    /// Number of keys in a shard
    KeyCount { id: usize },

    /// Add a view member to a shard
    AddMember { id: usize, address: String },

    /// Change the number of shards
    Reshard { count: usize },

    /// Node status
    Status,
}

async fn call(
    client: &reqwest::Client,
    node: &str,
    method: Method,
    endpoint: &str,
    body: Option<Value>,
) -> anyhow::Result<()> {
    let mut request = client.request(method, node_url(node, endpoint));
    if let Some(body) = body {
        request = request.json(&body);
    }
    let response = request.send().await?;
    let status = response.status();
    let text = response.text().await?;

    let pretty = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|v| serde_json::to_string_pretty(&v).ok())
        .unwrap_or(text);
    println!("{} {}", status.as_u16(), pretty);

    if !status.is_success() {
        anyhow::bail!("request failed with {}", status);
    }
    Ok(())
}

fn parse_metadata(raw: Option<&str>) -> anyhow::Result<Value> {
    match raw {
        Some(raw) => Ok(serde_json::from_str(raw)?),
        None => Ok(json!({})),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let node = cli.node.as_str();
    let metadata = parse_metadata(cli.metadata.as_deref())?;

    match cli.command {
        Commands::Get { key } => {
            let body = json!({ "causal-metadata": metadata });
            call(&client, node, Method::GET, &kvs_path(&key), Some(body)).await?;
        }

        Commands::Put { key, value } => {
            let value = serde_json::from_str::<Value>(&value).unwrap_or(Value::String(value));
            let body = json!({ "value": value, "causal-metadata": metadata });
            call(&client, node, Method::PUT, &kvs_path(&key), Some(body)).await?;
        }

        Commands::Delete { key } => {
            let body = json!({ "causal-metadata": metadata });
            call(&client, node, Method::DELETE, &kvs_path(&key), Some(body)).await?;
        }

        Commands::View => call(&client, node, Method::GET, "/view", None).await?,

        Commands::ShardIds => call(&client, node, Method::GET, "/shard/ids", None).await?,

        Commands::NodeShard => {
            call(&client, node, Method::GET, "/shard/node-shard-id", None).await?
        }

        Commands::Members { id } => {
            let endpoint = format!("/shard/members/{}", id);
            call(&client, node, Method::GET, &endpoint, None).await?;
        }

        Commands::KeyCount { id } => {
            let endpoint = format!("/shard/key-count/{}", id);
            call(&client, node, Method::GET, &endpoint, None).await?;
        }

        Commands::AddMember { id, address } => {
            let endpoint = format!("/shard/add-member/{}", id);
            let body = json!({ "socket-address": address });
            call(&client, node, Method::PUT, &endpoint, Some(body)).await?;
        }

        Commands::Reshard { count } => {
            let body = json!({ "shard-count": count });
            call(&client, node, Method::PUT, "/shard/reshard", Some(body)).await?;
        }

        Commands::Status => call(&client, node, Method::GET, "/admin/status", None).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_metadata() {
        assert_eq!(parse_metadata(None).unwrap(), json!({}));
        assert_eq!(
            parse_metadata(Some(r#"{"a:1": 2}"#)).unwrap(),
            json!({"a:1": 2})
        );
        assert!(parse_metadata(Some("not json")).is_err());
    }
}
