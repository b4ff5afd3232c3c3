use clap::{arg,crate_version,value_parser,ArgMatches,Command};
use lzwpack::lzw;
use lzwpack::tools::bit_stream::{self,BitStream,Mode};
use std::time::Instant;
type STDRESULT = Result<(),Box<dyn std::error::Error>>;

const RCH: &str = "unreachable was reached";
const DEFAULT_COMPRESSED: &str = "./compressed";
const DEFAULT_EXPANDED: &str = "./decompressed";

fn ok_to_overwrite(path_out: &str,force: bool) -> bool {
    if force {
        return true;
    }
    if let Ok(_f) = std::fs::File::open(path_out) {
        let mut ans = String::new();
        eprint!("{} exists, overwrite? (y/n) ",path_out);
        if std::io::stdin().read_line(&mut ans).is_err() {
            return false;
        }
        return ans.trim_end()=="y" || ans.trim_end()=="Y";
    }
    true
}

/// code width and dictionary size, the size defaults to 2^bits
fn get_options(cmd: &ArgMatches) -> lzw::Options {
    let bits = *cmd.get_one::<u64>("bits").expect(RCH) as usize;
    let mut opt = lzw::Options::with_bits(bits);
    match cmd.get_one::<u64>("size") {
        Some(size) => opt.capacity = *size as usize,
        None => log::info!("using default dictionary size {}",opt.capacity)
    }
    opt
}

fn coding_cmd(name: &'static str,about: &'static str) -> Command {
    Command::new(name)
        .arg(arg!(-i --input <PATH> "input path").required(true))
        .arg(arg!(-o --output <PATH> "output path").required(false))
        .arg(arg!(-b --bits <BITS> "code width").value_parser(value_parser!(u64).range(9..=15))
            .default_value("12"))
        .arg(arg!(-s --size <SIZE> "dictionary size, defaults to 2^BITS").required(false)
            .value_parser(value_parser!(u64).range(1..)))
        .arg(arg!(-f --force "overwrite output without asking"))
        .about(about)
}

fn main() -> STDRESULT
{
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let long_help =
"Examples:
---------
Compress:      `lzwpack compress -b 12 -i my_expanded -o my_compressed`
Expand:        `lzwpack expand -b 12 -i my_compressed -o my_expanded`
List codes:    `lzwpack dump -b 12 -i my_compressed`

Code width and dictionary size are not stored in the compressed file,
expand with the same values that were used to compress.";

    let mut main_cmd = Command::new("lzwpack")
        .about("Compress and expand with fixed width LZW")
        .after_long_help(long_help)
        .subcommand_required(true)
        .version(crate_version!());
    main_cmd = main_cmd.subcommand(coding_cmd("compress","compress a file"));
    main_cmd = main_cmd.subcommand(coding_cmd("expand","expand a file"));
    main_cmd = main_cmd.subcommand(Command::new("dump")
        .arg(arg!(-i --input <PATH> "input path").required(true))
        .arg(arg!(-b --bits <BITS> "code width").value_parser(value_parser!(u64).range(9..=15))
            .default_value("12"))
        .about("print the codes in a compressed file"));

    let matches = main_cmd.get_matches();

    if let Some(cmd) = matches.subcommand_matches("compress") {
        let path_in = cmd.get_one::<String>("input").expect(RCH);
        let path_out = cmd.get_one::<String>("output").map(String::as_str).unwrap_or(DEFAULT_COMPRESSED);
        let opt = get_options(cmd);
        if !ok_to_overwrite(path_out,cmd.get_flag("force")) {
            eprintln!("abort operation");
            return Ok(());
        }
        eprintln!("compress with {} bit codes and {} dictionary slots",opt.bits,opt.capacity);
        let start = Instant::now();
        let stats = lzw::compress_file(path_in,path_out,&opt)?;
        eprintln!("compressed {} into {} in {:.3} s",stats.in_size,stats.out_size,start.elapsed().as_secs_f64());
        eprintln!("lookups {}, collisions {}, average collisions {:.3}",
            stats.metrics.lookups,stats.metrics.collisions,stats.metrics.average_collisions());
        log::info!("{} codes, {} dictionary resets",stats.codes,stats.resets);
    }

    if let Some(cmd) = matches.subcommand_matches("expand") {
        let path_in = cmd.get_one::<String>("input").expect(RCH);
        let path_out = cmd.get_one::<String>("output").map(String::as_str).unwrap_or(DEFAULT_EXPANDED);
        let opt = get_options(cmd);
        if !ok_to_overwrite(path_out,cmd.get_flag("force")) {
            eprintln!("abort operation");
            return Ok(());
        }
        eprintln!("expand with {} bit codes and {} dictionary slots",opt.bits,opt.capacity);
        let start = Instant::now();
        let stats = lzw::expand_file(path_in,path_out,&opt)?;
        eprintln!("expanded {} into {} in {:.3} s",stats.in_size,stats.out_size,start.elapsed().as_secs_f64());
        log::info!("{} codes, {} dictionary resets",stats.codes,stats.resets);
    }

    if let Some(cmd) = matches.subcommand_matches("dump") {
        let path_in = cmd.get_one::<String>("input").expect(RCH);
        let bits = *cmd.get_one::<u64>("bits").expect(RCH) as usize;
        let mut stream = BitStream::open(path_in,Mode::Read)?;
        let count = bit_stream::dump_codes(&mut stream,bits,&mut std::io::stdout().lock())?;
        stream.close()?;
        eprintln!("{} codes",count);
    }

    Ok(())
}
