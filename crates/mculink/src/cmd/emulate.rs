use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mculink_rpc::DeviceEmulator;
use mculink_transport::{LinkStream, TransportError, UnixSocketListener};
use tracing::{debug, info, warn};

use crate::cmd::EmulateArgs;
use crate::exit::{transport_error, CliError, CliResult, SUCCESS};

const ACCEPT_POLL: Duration = Duration::from_millis(25);

pub fn run(args: EmulateArgs) -> CliResult<i32> {
    let listener =
        UnixSocketListener::bind(&args.path).map_err(|err| transport_error("bind failed", err))?;
    listener
        .set_nonblocking(true)
        .map_err(|err| transport_error("bind failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let properties = Arc::new(device_properties(args.properties));
    info!(path = %args.path.display(), "emulator listening");

    let mut connections = 0u64;
    while running.load(Ordering::SeqCst) {
        let stream = match listener.accept() {
            Ok(stream) => stream,
            Err(TransportError::Accept(err)) if err.kind() == ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
                continue;
            }
            Err(err) => return Err(transport_error("accept failed", err)),
        };
        connections += 1;
        info!(connection = connections, "host connected");

        let properties = Arc::clone(&properties);
        thread::Builder::new()
            .name(format!("emulator-{connections}"))
            .spawn(move || serve(stream, &properties))
            .map_err(|err| CliError::new(crate::exit::INTERNAL, format!("spawn failed: {err}")))?;
    }

    info!("emulator stopped");
    Ok(SUCCESS)
}

fn device_properties(extra: Vec<(String, String)>) -> Vec<(String, String)> {
    let mut properties = vec![
        ("device".to_string(), "mculink-emulator".to_string()),
        ("version".to_string(), env!("CARGO_PKG_VERSION").to_string()),
    ];
    properties.extend(extra);
    properties
}

fn serve(stream: LinkStream, properties: &[(String, String)]) {
    let reader = match stream.try_clone() {
        Ok(reader) => reader,
        Err(err) => {
            warn!(error = %err, "cannot clone connection");
            return;
        }
    };
    let mut emulator = properties
        .iter()
        .fold(DeviceEmulator::new(), |emu, (k, v)| emu.with_property(k, v));

    match emulator.serve(reader, stream) {
        Ok(()) => debug!("host disconnected"),
        Err(err) => warn!(error = %err, "connection failed"),
    }
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
