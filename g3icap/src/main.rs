/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::io::{self, Write};
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, anyhow};
use bytes::Bytes;
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use clap_complete::Shell;
use http::Method;
use log::{info, warn};
use tokio::sync::oneshot;
use url::Url;

use g3_icap_xact::{
    AdaptationAnswer, IcapClientInfo, IcapLauncher, IcapMethod, IcapService, IcapServiceConfig,
    IcapServiceOptions, IcapServiceRep, MessageFacade, driver::TcpConnectionProvider,
};

mod config;
mod logger;
mod message;

use message::VirginMessage;

const GLOBAL_ARG_COMPLETION: &str = "completion";
const GLOBAL_ARG_CONFIG: &str = "config";
const GLOBAL_ARG_SERVICE: &str = "service";
const GLOBAL_ARG_ICAP_METHOD: &str = "icap-method";
const GLOBAL_ARG_URL: &str = "url";
const GLOBAL_ARG_METHOD: &str = "method";
const GLOBAL_ARG_HEADER: &str = "header";
const GLOBAL_ARG_STATUS: &str = "status";
const GLOBAL_ARG_BODY: &str = "body";
const GLOBAL_ARG_CLIENT_IP: &str = "client-ip";
const GLOBAL_ARG_CLIENT_USER: &str = "client-user";
const GLOBAL_ARG_BYPASS: &str = "bypass";
const GLOBAL_ARG_VERBOSE: &str = "verbose";

fn build_cli_args() -> Command {
    Command::new("g3icap")
        .about("Send one HTTP message through an ICAP service")
        .arg(
            Arg::new(GLOBAL_ARG_COMPLETION)
                .num_args(1)
                .value_name("SHELL")
                .long("completion")
                .value_parser(value_parser!(Shell))
                .exclusive(true),
        )
        .arg(
            Arg::new(GLOBAL_ARG_URL)
                .help("URL of the HTTP message")
                .num_args(1)
                .value_name("URL")
                .value_parser(value_parser!(Url))
                .required_unless_present(GLOBAL_ARG_COMPLETION),
        )
        .arg(
            Arg::new(GLOBAL_ARG_CONFIG)
                .help("YAML file with service and adaptation settings")
                .num_args(1)
                .value_name("CONFIG FILE")
                .value_parser(value_parser!(PathBuf))
                .long("config")
                .short('c'),
        )
        .arg(
            Arg::new(GLOBAL_ARG_SERVICE)
                .help("ICAP service URL, used when no service is configured")
                .num_args(1)
                .value_name("ICAP URL")
                .value_parser(value_parser!(Url))
                .long("service")
                .short('s'),
        )
        .arg(
            Arg::new(GLOBAL_ARG_ICAP_METHOD)
                .help("ICAP method, used when no service is configured")
                .num_args(1)
                .value_name("METHOD")
                .value_parser(["reqmod", "respmod"])
                .default_value("reqmod")
                .long("icap-method")
                .short('m'),
        )
        .arg(
            Arg::new(GLOBAL_ARG_BYPASS)
                .help("Forward the virgin message if the service fails")
                .action(ArgAction::SetTrue)
                .long("bypass"),
        )
        .arg(
            Arg::new(GLOBAL_ARG_METHOD)
                .help("HTTP request method")
                .num_args(1)
                .value_name("METHOD")
                .long("method")
                .short('X'),
        )
        .arg(
            Arg::new(GLOBAL_ARG_HEADER)
                .help("Add an HTTP header line")
                .num_args(1)
                .value_name("NAME: VALUE")
                .action(ArgAction::Append)
                .long("header")
                .short('H'),
        )
        .arg(
            Arg::new(GLOBAL_ARG_STATUS)
                .help("HTTP reply status code for RESPMOD")
                .num_args(1)
                .value_name("CODE")
                .value_parser(value_parser!(u16).range(100..1000))
                .default_value("200")
                .long("status"),
        )
        .arg(
            Arg::new(GLOBAL_ARG_BODY)
                .help("File with the HTTP message body")
                .num_args(1)
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .long("body")
                .short('d'),
        )
        .arg(
            Arg::new(GLOBAL_ARG_CLIENT_IP)
                .help("HTTP client address")
                .num_args(1)
                .value_name("IP ADDRESS")
                .value_parser(value_parser!(IpAddr))
                .long("client-ip"),
        )
        .arg(
            Arg::new(GLOBAL_ARG_CLIENT_USER)
                .help("HTTP client username")
                .num_args(1)
                .value_name("USERNAME")
                .long("client-user"),
        )
        .arg(
            Arg::new(GLOBAL_ARG_VERBOSE)
                .help("show verbose message")
                .num_args(0)
                .action(ArgAction::Count)
                .short('v'),
        )
}

fn service_config(
    args: &ArgMatches,
    configured: Option<IcapServiceConfig>,
) -> anyhow::Result<IcapServiceConfig> {
    let mut service = match configured {
        Some(service) => service,
        None => {
            let url = args
                .get_one::<Url>(GLOBAL_ARG_SERVICE)
                .ok_or_else(|| anyhow!("no ICAP service set in config file or by --service"))?;
            let method = args
                .get_one::<String>(GLOBAL_ARG_ICAP_METHOD)
                .and_then(|s| IcapMethod::from_str(s).ok())
                .unwrap_or(IcapMethod::Reqmod);
            IcapServiceConfig::new(method, url.clone())?
        }
    };
    if args.get_flag(GLOBAL_ARG_BYPASS) {
        service.set_bypass(true);
    }
    Ok(service)
}

fn virgin_message(args: &ArgMatches, url: Url) -> anyhow::Result<VirginMessage> {
    let mut msg = VirginMessage::new(url);
    if let Some(method) = args.get_one::<String>(GLOBAL_ARG_METHOD) {
        let method = Method::from_str(method)
            .map_err(|e| anyhow!("invalid HTTP method {method}: {e}"))?;
        msg.method = Some(method);
    }
    if let Some(lines) = args.get_many::<String>(GLOBAL_ARG_HEADER) {
        for line in lines {
            msg.add_header(line)?;
        }
    }
    if let Some(status) = args.get_one::<u16>(GLOBAL_ARG_STATUS) {
        msg.status = *status;
    }
    if let Some(path) = args.get_one::<PathBuf>(GLOBAL_ARG_BODY) {
        let body = std::fs::read(path)
            .map_err(|e| anyhow!("failed to read body file {}: {e}", path.display()))?;
        msg.body = Some(Bytes::from(body));
    }
    Ok(msg)
}

async fn print_answer(answer: AdaptationAnswer) -> anyhow::Result<()> {
    match answer {
        AdaptationAnswer::Forward(msg) => print_message(msg).await,
        AdaptationAnswer::Block(rule) => Err(anyhow!("blocked by ICAP service, rule: {rule}")),
        AdaptationAnswer::Error { is_final } => Err(anyhow!(
            "ICAP adaptation failed{}",
            if is_final { ", no more service to try" } else { "" }
        )),
    }
}

async fn print_message(msg: MessageFacade) -> anyhow::Result<()> {
    let mut buf = Vec::with_capacity(1024);
    msg.head.pack_into(&mut buf);
    let mut stdout = io::stdout().lock();
    stdout.write_all(&buf)?;
    drop(stdout);

    let Some(pipe) = msg.body_pipe else {
        return Ok(());
    };
    loop {
        let data = pipe.take_all();
        if !data.is_empty() {
            io::stdout().lock().write_all(&data)?;
        }
        if pipe.exhausted() {
            break;
        }
        pipe.data_available().await;
    }
    if pipe.producer_aborted() {
        pipe.abort();
        return Err(anyhow!("the adapted body is truncated"));
    }
    pipe.detach();
    io::stdout().lock().flush()?;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = build_cli_args().get_matches();

    if let Some(target) = args.get_one::<Shell>(GLOBAL_ARG_COMPLETION) {
        let mut app = build_cli_args();
        let bin_name = app.get_name().to_string();
        clap_complete::generate(*target, &mut app, bin_name, &mut io::stdout());
        return Ok(());
    }

    let verbose_level = args
        .get_one::<u8>(GLOBAL_ARG_VERBOSE)
        .copied()
        .unwrap_or_default();
    let _log_guard = logger::SyncLogger::new(verbose_level)
        .into_global_logger()
        .context("failed to setup logger")?;

    let cli_config = match args.get_one::<PathBuf>(GLOBAL_ARG_CONFIG) {
        Some(path) => config::load_file(path)?,
        None => config::CliConfig::default(),
    };
    let service_config = service_config(&args, cli_config.service)?;
    let icap_method = service_config.method();

    let service = IcapServiceRep::new(Arc::new(service_config));
    if service.options().is_none() {
        info!("no static options configured, using the default ones");
        service.set_options(IcapServiceOptions::default());
    }
    let service: Arc<dyn IcapService> = Arc::new(service);

    let url = args
        .get_one::<Url>(GLOBAL_ARG_URL)
        .cloned()
        .ok_or_else(|| anyhow!("no URL set"))?;
    let msg = virgin_message(&args, url)?;
    let xact_config = Arc::new(cli_config.adaptation);
    let (mut request, producer) = msg.build(icap_method, xact_config.backup_limit())?;
    request.set_client(IcapClientInfo {
        addr: args.get_one::<IpAddr>(GLOBAL_ARG_CLIENT_IP).copied(),
        username: args.get_one::<String>(GLOBAL_ARG_CLIENT_USER).cloned(),
        password: None,
    });
    if let (Some(producer), Some(body)) = (producer, msg.body) {
        tokio::spawn(message::produce_body(producer, body));
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, no more relaunch");
            shutdown_flag.store(true, Ordering::Relaxed);
        }
    });

    let (sender, receiver) = oneshot::channel();
    let mut launcher = IcapLauncher::new(service, xact_config, Box::new(sender));
    launcher.set_shutdown_flag(shutdown);
    launcher.set_logger(slog_scope::logger());

    let provider = TcpConnectionProvider::new(cli_config.max_idle_connections);
    let initiator = async move {
        match receiver.await {
            Ok(answer) => print_answer(answer).await,
            Err(_) => Err(anyhow!("no adaptation answer received")),
        }
    };
    let (_, r) = tokio::join!(
        g3_icap_xact::run_adaptation(&mut launcher, &provider, request),
        initiator
    );
    info!(
        "adaptation done after {} launch(es)",
        launcher.launches()
    );
    r
}
