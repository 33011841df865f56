//! CLI for cluster operations

use anyhow::Context;
use clap::{Parser, Subcommand};
use reqwest::Method;
use serde_json::{json, Value};
use shardkv::common::encode_key;

#[derive(Parser)]
#[command(name = "shardkv")]
#[command(about = "shardkv replicated key-value store CLI")]
#[command(version)]
struct Cli {
    /// Replica to talk to ("ip:port")
    #[arg(long, env = "SHARDKV_REPLICA", default_value = "localhost:8080")]
    replica: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read a key
    Get {
        /// Key
        key: String,
    },

    /// Write a key
    Put {
        /// Key
        key: String,

        /// Value
        value: String,

        /// Causal history from a previous response (comma-separated)
        #[arg(long, value_delimiter = ',')]
        causal_metadata: Vec<u64>,
    },

    /// Delete a key
    Delete {
        /// Key
        key: String,

        /// Causal history from a previous response (comma-separated)
        #[arg(long, value_delimiter = ',')]
        causal_metadata: Vec<u64>,
    },

    /// Show the membership view
    View,

    /// Add a replica to the view
    AddReplica {
        /// Address of the replica ("ip:port")
        address: String,
    },

    /// Remove a replica from the view
    RemoveReplica {
        /// Address of the replica ("ip:port")
        address: String,
    },

    /// Show shard ids, members and key counts
    ShardInfo,

    /// Add a replica to a shard
    AddMember {
        /// Shard id
        shard: u64,

        /// Address of the replica ("ip:port")
        address: String,
    },

    /// Repartition the key space
    Reshard {
        /// New shard count
        shard_count: u64,
    },
}

struct Client {
    http: reqwest::Client,
    base: String,
}

impl Client {
    fn new(replica: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: format!("http://{}", replica),
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> anyhow::Result<(u16, Value)> {
        let response = request
            .send()
            .await
            .with_context(|| format!("cannot reach {}", self.base))?;
        let status = response.status().as_u16();
        let body = response.json::<Value>().await.unwrap_or(Value::Null);
        Ok((status, body))
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> anyhow::Result<(u16, Value)> {
        let mut request = self.http.request(method, format!("{}{}", self.base, path));
        if let Some(body) = body {
            request = request.json(&body);
        }
        self.send(request).await
    }
}

fn print(status: u16, body: &Value) -> anyhow::Result<()> {
    println!("{} {}", status, serde_json::to_string_pretty(body)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let client = Client::new(&cli.replica);

    match cli.command {
        Commands::Get { key } => {
            let path = format!("/key-value-store/{}", encode_key(&key));
            let (status, body) = client.call(Method::GET, &path, None).await?;
            print(status, &body)?;
        }

        Commands::Put {
            key,
            value,
            causal_metadata,
        } => {
            let path = format!("/key-value-store/{}", encode_key(&key));
            let body = json!({ "value": value, "causal-metadata": causal_metadata });
            let (status, body) = client.call(Method::PUT, &path, Some(body)).await?;
            print(status, &body)?;
        }

        Commands::Delete {
            key,
            causal_metadata,
        } => {
            let path = format!("/key-value-store/{}", encode_key(&key));
            let body = json!({ "causal-metadata": causal_metadata });
            let (status, body) = client.call(Method::DELETE, &path, Some(body)).await?;
            print(status, &body)?;
        }

        Commands::View => {
            let (status, body) = client
                .call(Method::GET, "/key-value-store-view", None)
                .await?;
            print(status, &body)?;
        }

        Commands::AddReplica { address } => {
            let body = json!({ "socket-address": address });
            let (status, body) = client
                .call(Method::PUT, "/key-value-store-view", Some(body))
                .await?;
            print(status, &body)?;
        }

        Commands::RemoveReplica { address } => {
            let body = json!({ "socket-address": address });
            let (status, body) = client
                .call(Method::DELETE, "/key-value-store-view", Some(body))
                .await?;
            print(status, &body)?;
        }

        Commands::ShardInfo => {
            let (_, ids) = client
                .call(Method::GET, "/key-value-store-shard/shard-ids", None)
                .await?;
            let (_, own) = client
                .call(Method::GET, "/key-value-store-shard/node-shard-id", None)
                .await?;
            println!("Shard info:");
            println!("  This replica: shard {}", own["shard-id"]);

            let shard_ids: Vec<u64> = serde_json::from_value(ids["shard-ids"].clone())
                .context("unexpected shard-ids response")?;
            for id in shard_ids {
                let (_, members) = client
                    .call(
                        Method::GET,
                        &format!("/key-value-store-shard/shard-id-members/{}", id),
                        None,
                    )
                    .await?;
                let (_, count) = client
                    .call(
                        Method::GET,
                        &format!("/key-value-store-shard/shard-id-key-count/{}", id),
                        None,
                    )
                    .await?;
                println!(
                    "  Shard {}: members [{}], keys {}",
                    id,
                    members["shard-id-members"].as_str().unwrap_or(""),
                    count["shard-id-key-count"]
                );
            }
        }

        Commands::AddMember { shard, address } => {
            let body = json!({ "socket-address": address });
            let path = format!("/key-value-store-shard/add-member/{}", shard);
            let (status, body) = client.call(Method::PUT, &path, Some(body)).await?;
            print(status, &body)?;
        }

        Commands::Reshard { shard_count } => {
            let body = json!({ "shard-count": shard_count });
            let (status, body) = client
                .call(Method::PUT, "/key-value-store-shard/reshard", Some(body))
                .await?;
            print(status, &body)?;
        }
    }

    Ok(())
}
