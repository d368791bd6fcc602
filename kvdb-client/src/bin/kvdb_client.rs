//! One-shot CLI client: connects, sends a single command, prints the
//! result, and exits.

use clap::Parser;
use kvdb_client::ClientSession;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "kvdb-client",
    about = "One-shot client for the kvdb networked key-value store",
    long_about = "Sends a single INSERT, UPDATE, GET or DELETE command to a kvdb server and prints the result.\n\nExamples:\n  kvdb-client --hostname 127.0.0.1 INSERT mykey myvalue\n  kvdb-client --hostname 127.0.0.1 GET mykey"
)]
struct Args {
    #[arg(long, value_name = "HOST", help = "Server hostname or address", env = "KVDB_HOSTNAME")]
    hostname: String,

    #[arg(long, value_name = "PORT", help = "Server port", default_value_t = 1524, env = "KVDB_PORT")]
    port: u16,

    #[arg(value_name = "COMMAND", help = "INSERT <key> <value> | UPDATE <key> <value> | GET <key> | DELETE <key>", num_args = 2..=3)]
    command: Vec<String>,
}

enum ParsedCommand {
    Insert { key: String, value: String },
    Update { key: String, value: String },
    Get { key: String },
    Delete { key: String },
}

fn parse_command(tokens: &[String]) -> anyhow::Result<ParsedCommand> {
    let verb = tokens
        .first()
        .ok_or_else(|| anyhow::anyhow!("missing command; expected INSERT, UPDATE, GET or DELETE"))?
        .to_uppercase();

    match verb.as_str() {
        "INSERT" => {
            let (key, value) = two_args(tokens, "INSERT")?;
            Ok(ParsedCommand::Insert { key, value })
        }
        "UPDATE" => {
            let (key, value) = two_args(tokens, "UPDATE")?;
            Ok(ParsedCommand::Update { key, value })
        }
        "GET" => Ok(ParsedCommand::Get { key: one_arg(tokens, "GET")? }),
        "DELETE" => Ok(ParsedCommand::Delete { key: one_arg(tokens, "DELETE")? }),
        other => Err(anyhow::anyhow!("unrecognized command '{other}'; expected INSERT, UPDATE, GET or DELETE")),
    }
}

fn two_args(tokens: &[String], verb: &str) -> anyhow::Result<(String, String)> {
    if tokens.len() != 3 {
        return Err(anyhow::anyhow!("{verb} requires exactly a key and a value"));
    }
    Ok((tokens[1].clone(), tokens[2].clone()))
}

fn one_arg(tokens: &[String], verb: &str) -> anyhow::Result<String> {
    if tokens.len() != 2 {
        return Err(anyhow::anyhow!("{verb} requires exactly a key"));
    }
    Ok(tokens[1].clone())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args = Args::parse();
    let parsed = parse_command(&args.command)?;

    let addr = format!("{}:{}", args.hostname, args.port);
    let client = ClientSession::connect(&addr).await?;

    let result = match parsed {
        ParsedCommand::Insert { key, value } => client.insert(&key, &value).await?,
        ParsedCommand::Update { key, value } => client.update(&key, &value).await?,
        ParsedCommand::Get { key } => client.get(&key).await?,
        ParsedCommand::Delete { key } => client.delete(&key).await?,
    };

    if !result.code.is_success() {
        anyhow::bail!("server reported failure (code {:?})", result.code);
    }
    if !result.value.is_empty() {
        println!("{}", result.value.as_str());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(s: &[&str]) -> Vec<String> {
        s.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_insert() {
        let parsed = parse_command(&tokens(&["INSERT", "k", "v"])).unwrap();
        assert!(matches!(parsed, ParsedCommand::Insert { key, value } if key == "k" && value == "v"));
    }

    #[test]
    fn parses_get_lowercase() {
        let parsed = parse_command(&tokens(&["get", "k"])).unwrap();
        assert!(matches!(parsed, ParsedCommand::Get { key } if key == "k"));
    }

    #[test]
    fn insert_requires_two_args() {
        assert!(parse_command(&tokens(&["INSERT", "k"])).is_err());
    }

    #[test]
    fn get_rejects_extra_arg() {
        assert!(parse_command(&tokens(&["GET", "k", "extra"])).is_err());
    }

    #[test]
    fn rejects_unknown_verb() {
        assert!(parse_command(&tokens(&["FROBNICATE", "k"])).is_err());
    }
}
