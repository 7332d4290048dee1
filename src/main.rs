use clap::{arg, command, value_parser, ArgMatches, Command};
use colored::Colorize;

use weir::demos;
use weir::runtime::Runtime;

fn main() {
    let matches = command!()
        .subcommand_required(true)
        .arg(arg!(-v --verbose ... "Log progress (-v info, -vv debug)").global(true))
        .subcommand(Command::new("list").about("List the built-in demo networks"))
        .subcommand(
            Command::new("run")
                .about("Run a built-in demo network")
                .arg(arg!(<demo> "The demo network to run"))
                .arg(
                    arg!(--records <count> "How many records to feed")
                        .value_parser(value_parser!(usize))
                        .default_value("16"),
                )
                .arg(
                    arg!(--workers <count> "Worker threads, defaults to the number of CPUs")
                        .value_parser(value_parser!(usize)),
                )
                .arg(
                    arg!(--capacity <records> "Stream capacity, 0 for unbounded")
                        .value_parser(value_parser!(usize)),
                )
                .arg(arg!(-q --quiet "Do not print the records that come out"))
                .arg(arg!(--json "Print records and the summary as JSON")),
        )
        .get_matches();

    init_tracing(matches.get_count("verbose"));

    match matches.subcommand() {
        Some(("list", _)) => list(),
        Some(("run", args)) => run(args),
        _ => unreachable!(),
    }
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => return,
        1 => tracing::Level::INFO,
        _ => tracing::Level::DEBUG,
    };
    tracing_subscriber::fmt().with_max_level(level).init();
}

fn list() {
    for demo in demos::all() {
        println!("{} {}", format!("{:<12}", demo.name).bold(), demo.about);
    }
}

fn run(args: &ArgMatches) {
    let name = args.get_one::<String>("demo").unwrap();
    let Some(demo) = demos::find(name) else {
        println!("{}: {}", "No such demo".bright_red(), name);
        println!("`weir list` shows what there is.");
        std::process::exit(1);
    };
    let count = *args.get_one::<usize>("records").unwrap();
    let quiet = args.get_flag("quiet");
    let json = args.get_flag("json");

    let mut builder = Runtime::builder();
    if let Some(workers) = args.get_one::<usize>("workers") {
        builder = builder.workers(*workers);
    }
    if let Some(capacity) = args.get_one::<usize>("capacity") {
        builder = builder.stream_capacity(*capacity);
    }
    let runtime = builder.build();

    let report = demos::run(&runtime, &demo, count, |record| {
        if quiet {
            return;
        }
        if json {
            println!("{}", record.to_json(&demo.labels, runtime.registry()));
        } else {
            println!("{}", record.dump(&demo.labels, runtime.registry()));
        }
    });
    if json {
        println!(
            "{}",
            serde_json::to_string(&report).expect("the report serializes")
        );
    } else {
        println!(
            "{} {} records out in {:?}, drain probe came back in {:?}",
            "done:".bold(),
            report.records,
            report.elapsed,
            report.probe_round_trip,
        );
    }
    runtime.shutdown();
}
