use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgMatches, Command};

use mcrawfs_core::bw64::Bw64Reader;

fn file_arg() -> Arg {
    Arg::new("file_path")
        .value_name("FILE_PATH")
        .help("Path to the WAV/BW64/RF64 file")
        .required(true)
        .value_parser(value_parser!(PathBuf))
}

fn cli() -> Command {
    Command::new(env!("CARGO_PKG_NAME"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .about("Inspect the BW64/RF64 audio layer of projected MCRAW recordings")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("probe")
                .about("Print the audio format summary of a WAV file")
                .arg(file_arg()),
        )
        .subcommand(
            Command::new("chunks")
                .about("List every chunk present in a WAV file")
                .arg(file_arg()),
        )
}

fn open_reader(matches: &ArgMatches) -> Result<Bw64Reader<std::io::BufReader<std::fs::File>>> {
    let path = matches
        .get_one::<PathBuf>("file_path")
        .expect("required argument");
    Bw64Reader::open(path).with_context(|| format!("failed to parse '{}'", path.display()))
}

fn probe(matches: &ArgMatches) -> Result<()> {
    let reader = open_reader(matches)?;

    let frames = reader.number_of_frames();
    let rate = reader.sample_rate();
    println!("format:      {}", reader.file_format());
    println!("format tag:  {:#06x}", reader.format_tag());
    println!("channels:    {}", reader.channels());
    println!("sample rate: {rate} Hz");
    println!("bit depth:   {}", reader.bit_depth());
    println!("frames:      {frames}");
    if rate > 0 {
        println!("duration:    {:.3} s", frames as f64 / f64::from(rate));
    }
    Ok(())
}

fn chunks(matches: &ArgMatches) -> Result<()> {
    let reader = open_reader(matches)?;

    println!("{:>12}  {:>14}  id", "offset", "size");
    for header in reader.chunk_headers() {
        println!("{:>12}  {:>14}  {}", header.position, header.size, header.id);
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    match cli().get_matches().subcommand() {
        Some(("probe", matches)) => probe(matches),
        Some(("chunks", matches)) => chunks(matches),
        _ => unreachable!("subcommand is required"),
    }
}
