use std::fs::File;
use std::io::BufReader;

use jossp::Options;

/// Minimal example binary: decodes the file named on argv and prints a
/// summary of what was found. Not a pretty-printer — producing readable
/// output from a `DecodedStream` is an application concern, out of scope
/// here the same way a full CLI is.
fn main() {
    tracing_subscriber::fmt::init();

    let path = std::env::args().nth(1).unwrap_or_else(|| {
        eprintln!("usage: jossp <file>");
        std::process::exit(1);
    });

    let file = File::open(&path).unwrap_or_else(|err| {
        eprintln!("could not open {path}: {err}");
        std::process::exit(1);
    });

    let stream = match jossp::decode(BufReader::new(file), Options { connect_member_classes: true }) {
        Ok(stream) => stream,
        Err(err) => {
            eprintln!("decode failed: {err}");
            std::process::exit(1);
        }
    };

    println!("{} top-level record(s), {} epoch(s)", stream.top_level().len(), stream.epochs().len());
    for (i, record) in stream.top_level().iter().enumerate() {
        match record {
            Some(content) => println!("  [{i}] {}", content.data.kind_name()),
            None => println!("  [{i}] null"),
        }
    }
}
