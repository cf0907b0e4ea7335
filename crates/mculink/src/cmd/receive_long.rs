use serde::Serialize;

use crate::cmd::{connect, LinkArgs, ReceiveLongArgs};
use crate::exit::{io_error, link_error, CliResult, SUCCESS};
use crate::output::{hex, print_json, print_raw, OutputFormat};

#[derive(Serialize)]
struct ReceiveLongOutput<'a> {
    address: &'a str,
    function: &'a str,
    bytes: usize,
    payload_hex: Option<String>,
    out: Option<String>,
}

pub fn run(args: ReceiveLongArgs, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    let session = connect(&args.address, link)?;
    let result = session.receive_long(&args.function);
    session.disconnect();
    let data = result.map_err(|err| link_error("receive-long failed", err))?;

    if let Some(path) = &args.out {
        std::fs::write(path, &data)
            .map_err(|err| io_error(&format!("failed writing {}", path.display()), err))?;
    }

    match format {
        OutputFormat::Raw if args.out.is_none() => print_raw(&data),
        OutputFormat::Json => print_json(&ReceiveLongOutput {
            address: session.address(),
            function: &args.function,
            bytes: data.len(),
            payload_hex: args.out.is_none().then(|| hex(&data)),
            out: args.out.as_ref().map(|p| p.display().to_string()),
        }),
        _ => match &args.out {
            Some(path) => println!("received {} bytes into {}", data.len(), path.display()),
            None => println!("received {} bytes: {}", data.len(), hex(&data)),
        },
    }
    Ok(SUCCESS)
}
