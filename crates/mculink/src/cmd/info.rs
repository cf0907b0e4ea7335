use serde::Serialize;

use crate::cmd::{connect, InfoArgs, LinkArgs};
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_json, print_pairs, OutputFormat};

#[derive(Serialize)]
struct FunctionInfo {
    name: String,
    offset: u8,
}

#[derive(Serialize)]
struct InfoOutput {
    address: String,
    transport: String,
    fixed_mapping: bool,
    functions: Vec<FunctionInfo>,
    properties: serde_json::Map<String, serde_json::Value>,
}

pub fn run(args: InfoArgs, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    let session = connect(&args.address, link)?;
    let functions = session.functions();
    let names = functions.names();
    let properties = session.properties().entries();
    let fixed_mapping = functions.is_fixed();
    session.disconnect();

    match format {
        OutputFormat::Json => {
            let out = InfoOutput {
                address: session.address().to_string(),
                transport: link.transport.clone(),
                fixed_mapping,
                functions: names
                    .into_iter()
                    .map(|(name, offset)| FunctionInfo { name, offset })
                    .collect(),
                properties: properties
                    .into_iter()
                    .map(|(k, v)| (k, serde_json::Value::String(v)))
                    .collect(),
            };
            print_json(&out);
        }
        OutputFormat::Raw => {
            for (name, _) in names {
                println!("{name}");
            }
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("Device {} ({})", session.address(), link.transport);
            let rows: Vec<(String, String)> = names
                .into_iter()
                .map(|(name, offset)| (offset.to_string(), name))
                .collect();
            print_pairs(("OFFSET", "FUNCTION"), &rows, format);
            if !properties.is_empty() {
                print_pairs(("PROPERTY", "VALUE"), &properties, format);
            }
        }
    }
    Ok(SUCCESS)
}
