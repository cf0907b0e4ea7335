use serde::Serialize;

use crate::cmd::{connect, read_file, LinkArgs, SendLongArgs};
use crate::exit::{link_error, CliResult, FAILURE, SUCCESS};
use crate::output::{print_json, OutputFormat};

#[derive(Serialize)]
struct SendLongOutput<'a> {
    address: &'a str,
    function: &'a str,
    bytes: usize,
    #[serde(rename = "return")]
    ret: i32,
}

pub fn run(args: SendLongArgs, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    let data = read_file(&args.file)?;
    let session = connect(&args.address, link)?;
    let result = session.send_long(&args.function, &data);
    session.disconnect();
    let ret = result.map_err(|err| link_error("send-long failed", err))?;

    let out = SendLongOutput {
        address: session.address(),
        function: &args.function,
        bytes: data.len(),
        ret,
    };
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Raw => println!("{ret}"),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("sent {} bytes to {}: return {}", out.bytes, out.function, ret);
        }
    }

    // A negative value means the device aborted before the last chunk.
    Ok(if ret < 0 { FAILURE } else { SUCCESS })
}
