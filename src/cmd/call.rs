//! Invoke any registered method and print its JSON result.

use serde_json::Value;

use crate::{Result, config::Config, rpc::Client};

/// Each argument is parsed as JSON; anything that does not parse is passed as
/// a plain string, so `marksync call tags.create work` works unquoted.
pub fn parse_args(raw: &[String]) -> Vec<Value> {
   raw.iter()
      .map(|arg| serde_json::from_str(arg).unwrap_or_else(|_| Value::String(arg.clone())))
      .collect()
}

/// Executes the call command.
pub async fn execute(config: &Config, method: &str, args: &[String]) -> Result<()> {
   let client = Client::connect(config);
   let result = client.invoke(method, parse_args(args)).await?;
   println!("{}", serde_json::to_string_pretty(&result)?);
   Ok(())
}
