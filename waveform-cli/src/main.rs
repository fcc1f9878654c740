use clap::Parser;

/// Command-line front-end for the `waveform` R&S waveform codec library.
#[derive(Parser)]
#[command(name = "waveform", version, about = None, long_about = None)]
struct CliArgs;

fn main() {
    CliArgs::parse();
}
