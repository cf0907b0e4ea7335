use tracing::debug;

use crate::cmd::{connect, resolve_payload, CallArgs, LinkArgs};
use crate::exit::{link_error, CliResult, SUCCESS};
use crate::output::{print_reply, OutputFormat};

pub fn run(args: CallArgs, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    let payload = resolve_payload(&args)?;
    let session = connect(&args.address, link)?;

    let result = match args.function.parse::<u16>() {
        Ok(offset) => {
            debug!(offset, "calling by offset");
            session.call_offset(offset, payload)
        }
        Err(_) => session.call(&args.function, payload),
    };
    session.disconnect();

    let reply = result.map_err(|err| link_error("call failed", err))?;
    print_reply(session.address(), &args.function, &reply, format);
    Ok(SUCCESS)
}
