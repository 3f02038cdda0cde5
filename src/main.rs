//! `main-core`: ejecuta `amqp-config-job` sobre un broker en proceso.
//!
//! Uso:
//!   main-core run [--param k=v]... [--message <texto>]...
//!   main-core restart --execution <id> [--message <texto>]...
//!
//! Los mensajes se publican en la cola de entrada antes de lanzar el job; lo
//! que el job publica en el exchange se imprime al terminar.

use std::process::exit;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info};

use chunk_broker::{Broker, BrokerTemplate, InMemoryBroker, JsonMessageConverter, Message};
use chunk_core::{JobLauncher, JobParameters};
use chunkflow::wiring::{self, EXIT_CONFIGURATION, EXIT_INTERNAL};
use chunkflow::{build_job, exit_code, load_batch_config, logging};

enum Command {
    Run { params: JobParameters },
    Restart { execution_id: i64 },
}

struct Cli {
    command: Command,
    messages: Vec<String>,
}

fn usage() -> ! {
    eprintln!("usage: main-core run [--param k=v]... [--message <text>]...");
    eprintln!("       main-core restart --execution <id> [--message <text>]...");
    exit(EXIT_CONFIGURATION);
}

fn parse_args(args: &[String]) -> Option<Cli> {
    let mut params = JobParameters::new();
    let mut messages = Vec::new();
    let mut execution_id = None;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--param" => {
                i += 1;
                let (k, v) = JobParameters::parse_pair(args.get(i)?)?;
                params.insert(k, v);
            }
            "--message" => {
                i += 1;
                messages.push(args.get(i)?.clone());
            }
            "--execution" => {
                i += 1;
                execution_id = Some(args.get(i)?.parse::<i64>().ok()?);
            }
            _ => return None,
        }
        i += 1;
    }
    let command = match args.first()?.as_str() {
        "run" => Command::Run { params },
        "restart" => Command::Restart { execution_id: execution_id? },
        _ => return None,
    };
    Some(Cli { command, messages })
}

fn main() {
    logging::init();
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(cli) = parse_args(&args) else { usage() };

    let config = match load_batch_config() {
        Ok(c) => c,
        Err(e) => {
            error!("configuration error: {e}");
            exit(EXIT_CONFIGURATION);
        }
    };
    info!("broker {} (in-process), queue '{}', exchange '{}', chunk size {}",
          config.broker_address(),
          config.queue_name,
          config.exchange_name,
          config.chunk_size);

    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
    // Cola de observación enlazada al exchange de salida.
    let observed = format!("{}.observed", config.exchange_name);
    let topology = wiring::declare_topology(&broker, &config).and_then(|_| broker.declare_queue(&observed))
                                                             .and_then(|_| {
                                                                 broker.bind(&observed,
                                                                             &config.exchange_name,
                                                                             &config.routing_key)
                                                             });
    if let Err(e) = topology {
        error!("cannot declare broker topology: {e}");
        exit(EXIT_CONFIGURATION);
    }
    for body in &cli.messages {
        if let Err(e) = broker.publish("", &config.queue_name, Message::text(body.as_str())) {
            error!("cannot publish input message: {e}");
            exit(EXIT_INTERNAL);
        }
    }

    let repository = match wiring::repository_from_env() {
        Ok(r) => r,
        Err(e) => {
            error!("cannot open job repository: {e}");
            exit(EXIT_INTERNAL);
        }
    };
    let launcher = JobLauncher::new(repository);
    let mut job = match build_job(broker.clone(), &config) {
        Ok(j) => j,
        Err(e) => {
            error!("invalid job: {e}");
            exit(EXIT_CONFIGURATION);
        }
    };

    let outcome = match cli.command {
        Command::Run { params } => launcher.run(&mut job, &params),
        Command::Restart { execution_id } => launcher.restart(&mut job, execution_id),
    };
    match &outcome {
        Ok(execution) => {
            for step in &execution.step_executions {
                println!("{} {}: read={} write={} commit={} rollback={} skip={} filter={}",
                         execution.id,
                         step.step_name,
                         step.read_count,
                         step.write_count,
                         step.commit_count,
                         step.rollback_count,
                         step.skip_count(),
                         step.filter_count);
            }
            println!("{} {}", execution.job_name(), execution.status);
        }
        Err(e) => error!("job could not be launched: {e}"),
    }

    let output = BrokerTemplate::new(broker).with_queue(observed)
                                            .with_receive_timeout(Duration::from_millis(10));
    while let Ok(Some(value)) = output.receive_and_convert::<serde_json::Value, _>(&JsonMessageConverter) {
        println!("published: {value}");
    }
    exit(exit_code(&outcome));
}
