use clap::{Arg, ArgAction, Command};
use tracing::Level;

pub fn cli() -> Command {
    Command::new("ferrumd")
        .about("Ethereum execution-layer peer-to-peer node")
        .arg(
            Arg::new("p2p.port")
                .long("p2p.port")
                .default_value("30303")
                .value_name("PORT")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("network-id")
                .long("network-id")
                .default_value("1")
                .value_name("NETWORK_ID")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("max-peers")
                .long("max-peers")
                .default_value("25")
                .value_name("COUNT")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("bootnodes")
                .long("bootnodes")
                .value_name("ENODE")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("datadir")
                .long("datadir")
                .value_name("PATH")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("node-key")
                .long("node-key")
                .value_name("PATH")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .default_value(Level::INFO.as_str())
                .value_name("LOG_LEVEL")
                .action(ArgAction::Set),
        )
}
