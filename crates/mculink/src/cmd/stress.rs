use serde::Serialize;
use tracing::{info, warn};

use mculink_frame::MAX_PAYLOAD;
use mculink_rpc::emulator::{ECHO, ECHO_MANY};
use mculink_rpc::Session;

use crate::cmd::{connect, LinkArgs, StressArgs};
use crate::exit::{CliResult, FAILURE, SUCCESS};
use crate::output::{print_json, OutputFormat};

/// Bytes that came back intact versus not, per test.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
struct Tally {
    rounds: usize,
    matched: usize,
    mismatched: usize,
    errors: usize,
}

impl Tally {
    fn record(&mut self, sent: &[u8], received: &[u8]) {
        self.rounds += 1;
        let prefix = sent
            .iter()
            .zip(received)
            .take_while(|(a, b)| a == b)
            .count();
        if prefix == sent.len() && received.len() == sent.len() {
            self.matched += sent.len();
        } else {
            self.matched += prefix;
            self.mismatched += sent.len().max(received.len()) - prefix;
        }
    }

    fn fail(&mut self, sent: &[u8]) {
        self.rounds += 1;
        self.errors += 1;
        self.mismatched += sent.len();
    }

    fn ok(&self) -> bool {
        self.mismatched == 0 && self.errors == 0
    }
}

#[derive(Serialize)]
struct StressOutput<'a> {
    address: &'a str,
    seed: u64,
    echo: Tally,
    echo_many: Tally,
    ok: bool,
}

/// SplitMix64; payloads must be reproducible from the seed alone.
struct PayloadGen(u64);

impl PayloadGen {
    fn next_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// A payload of `0..=max_len` bytes.
    fn payload(&mut self, max_len: usize) -> Vec<u8> {
        let len = (self.next_u64() % (max_len as u64 + 1)) as usize;
        (0..len).map(|_| self.next_u64() as u8).collect()
    }
}

pub fn run(args: StressArgs, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    let session = connect(&args.address, link)?;
    let echo = stress_echo(&session, args.echo_rounds, args.seed);
    let echo_many = stress_echo_many(&session, args.many_rounds, args.max_len, args.seed);
    session.disconnect();

    let ok = echo.ok() && echo_many.ok();
    match format {
        OutputFormat::Json => print_json(&StressOutput {
            address: session.address(),
            seed: args.seed,
            echo,
            echo_many,
            ok,
        }),
        _ => {
            for (name, tally) in [(ECHO, echo), (ECHO_MANY, echo_many)] {
                println!(
                    "stresstest {name:<12} {:>6} ({}B of {}B came back correctly, {} errors)",
                    if tally.ok() { "OK" } else { "FAILED" },
                    tally.matched,
                    tally.matched + tally.mismatched,
                    tally.errors
                );
            }
        }
    }
    Ok(if ok { SUCCESS } else { FAILURE })
}

fn stress_echo(session: &Session, rounds: usize, seed: u64) -> Tally {
    let mut gen = PayloadGen(seed);
    let mut tally = Tally::default();
    for round in 0..rounds {
        let payload = gen.payload(MAX_PAYLOAD);
        match session.call(ECHO, payload.clone()) {
            Ok(reply) => tally.record(&payload, &reply.payload),
            Err(err) => {
                warn!(round, len = payload.len(), error = %err, "echo failed");
                tally.fail(&payload);
            }
        }
    }
    info!(?tally, "echo stress finished");
    tally
}

fn stress_echo_many(session: &Session, rounds: usize, max_len: usize, seed: u64) -> Tally {
    let mut gen = PayloadGen(seed);
    let mut tally = Tally::default();
    for round in 0..rounds {
        let payload = gen.payload(max_len);
        let echoed = session
            .send_long(ECHO_MANY, &payload)
            .and_then(|_| session.receive_long(ECHO_MANY));
        match echoed {
            Ok(received) => tally.record(&payload, &received),
            Err(err) => {
                warn!(round, len = payload.len(), error = %err, "chunked echo failed");
                tally.fail(&payload);
            }
        }
    }
    info!(?tally, "chunked echo stress finished");
    tally
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generator_is_deterministic() {
        let a: Vec<_> = (0..4).map(|_| PayloadGen(7).payload(64)).collect();
        assert!(a.windows(2).all(|w| w[0] == w[1]));

        let mut gen = PayloadGen(7);
        let first = gen.payload(64);
        let second = gen.payload(64);
        assert!(first.len() <= 64 && second.len() <= 64);
        assert_ne!(PayloadGen(1).next_u64(), PayloadGen(2).next_u64());
    }

    #[test]
    fn tally_counts_matching_prefix() {
        let mut tally = Tally::default();
        tally.record(b"abcdef", b"abcdef");
        assert_eq!((tally.matched, tally.mismatched), (6, 0));

        tally.record(b"abcdef", b"abXdef");
        assert_eq!((tally.matched, tally.mismatched), (8, 4));

        tally.record(b"abc", b"ab");
        assert_eq!((tally.matched, tally.mismatched), (10, 5));
        assert!(!tally.ok());

        let mut extra = Tally::default();
        extra.record(b"ab", b"abc");
        assert!(!extra.ok());
    }

    #[test]
    fn failed_round_counts_every_byte() {
        let mut tally = Tally::default();
        tally.fail(b"xyz");
        assert_eq!(tally.errors, 1);
        assert_eq!(tally.mismatched, 3);
        assert_eq!(tally.rounds, 1);
    }
}
