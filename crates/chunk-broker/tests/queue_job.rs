use std::sync::Arc;
use std::time::Duration;

use chunk_broker::{Broker, BrokerTemplate, InMemoryBroker, JsonMessageConverter, Message, QueueItemSink,
                   QueueItemSource};
use chunk_core::{BatchConfig, BatchStatus, CommitPolicy, FnProcessor, InMemoryJobRepository, ItemError, Job,
                 JobLauncher, JobParameters, StepBuilder};

const OUTPUT_QUEUE: &str = "rabbitmq.test.output";

fn config() -> BatchConfig {
    BatchConfig { receive_timeout: Duration::from_millis(20),
                  ..BatchConfig::default() }
}

/// Cola de entrada, exchange de salida y una cola enlazada para observarlo.
fn broker(cfg: &BatchConfig) -> Arc<InMemoryBroker> {
    let broker = Arc::new(InMemoryBroker::new());
    broker.declare_queue(&cfg.queue_name).unwrap();
    broker.declare_exchange(&cfg.exchange_name).unwrap();
    broker.declare_queue(OUTPUT_QUEUE).unwrap();
    broker.bind(OUTPUT_QUEUE, &cfg.exchange_name, &cfg.routing_key).unwrap();
    broker
}

fn publish(broker: &InMemoryBroker, cfg: &BatchConfig, bodies: &[&str]) {
    for body in bodies {
        broker.publish("", &cfg.queue_name, Message::text(*body)).unwrap();
    }
}

fn drain_output(broker: Arc<InMemoryBroker>) -> Vec<String> {
    let template = BrokerTemplate::new(broker).with_queue(OUTPUT_QUEUE)
                                              .with_receive_timeout(Duration::from_millis(5));
    let mut out = Vec::new();
    while let Some(item) = template.receive_and_convert::<String, _>(&JsonMessageConverter).unwrap() {
        out.push(item);
    }
    out
}

fn passthrough_job(broker: Arc<InMemoryBroker>, cfg: &BatchConfig) -> Job {
    let step = StepBuilder::from_config("step", cfg).reader(QueueItemSource::<String>::from_config(broker.clone(), cfg))
                                                    .writer(QueueItemSink::<String>::from_config(broker, cfg))
                                                    .build()
                                                    .unwrap();
    Job::builder("amqp-config-job").first_step(step).build().unwrap()
}

#[test]
fn moves_every_message_from_queue_to_exchange() {
    let cfg = config();
    let broker = broker(&cfg);
    publish(&broker, &cfg, &["a", "b", "c"]);
    let launcher = JobLauncher::new(Arc::new(InMemoryJobRepository::new()));

    let exec = launcher.run(&mut passthrough_job(broker.clone(), &cfg), &JobParameters::new())
                       .unwrap();

    assert_eq!(exec.status, BatchStatus::Completed);
    let step = &exec.step_executions[0];
    assert_eq!((step.read_count, step.write_count, step.commit_count), (3, 3, 3));
    assert_eq!(broker.unacked_count(), 0);
    assert_eq!(broker.ready_count(&cfg.queue_name).unwrap(), 0);
    assert_eq!(drain_output(broker), vec!["a", "b", "c"]);
}

#[test]
fn failed_step_requeues_and_restart_redelivers() {
    let cfg = config();
    let broker = broker(&cfg);
    publish(&broker, &cfg, &["a", "b", "c"]);
    let launcher = JobLauncher::new(Arc::new(InMemoryJobRepository::new()));
    let params = JobParameters::new().with("batch", "1");

    let failing = StepBuilder::from_config("step", &cfg).reader(QueueItemSource::<String>::from_config(broker.clone(), &cfg))
                                                        .processor(FnProcessor::new(|s: String| {
                                                            if s == "b" {
                                                                Err(ItemError::Transport("downstream unavailable".into()))
                                                            } else {
                                                                Ok(Some(s))
                                                            }
                                                        }))
                                                        .writer(QueueItemSink::<String>::from_config(broker.clone(), &cfg))
                                                        .build()
                                                        .unwrap();
    let mut job = Job::builder("amqp-config-job").first_step(failing).build().unwrap();
    let failed = launcher.run(&mut job, &params).unwrap();

    assert_eq!(failed.status, BatchStatus::Failed);
    assert_eq!(failed.step_executions[0].commit_count, 1);
    // "b" volvió a la cabeza de la cola; nada queda pendiente de ack.
    assert_eq!(broker.unacked_count(), 0);
    assert_eq!(broker.ready_count(&cfg.queue_name).unwrap(), 2);

    let resumed = launcher.restart(&mut passthrough_job(broker.clone(), &cfg), failed.id)
                          .unwrap();
    assert_eq!(resumed.status, BatchStatus::Completed);
    let step = &resumed.step_executions[0];
    assert_eq!(step.write_count, 2);
    // Sólo cuenta lo recibido en chunks confirmados: "a" antes del fallo, "b" y "c" después.
    assert_eq!(step.context.get_u64("queue_source.read.count"), Some(3));
    assert_eq!(drain_output(broker), vec!["a", "b", "c"]);
}

#[test]
fn poison_message_is_skipped_and_acknowledged() {
    let cfg = BatchConfig { skip_limit: 1,
                            chunk_size: 2,
                            ..config() };
    let broker = broker(&cfg);
    broker.publish("", &cfg.queue_name, Message::text("a")).unwrap();
    broker.publish("", &cfg.queue_name, Message::json(&b"{not json"[..])).unwrap();
    broker.publish("", &cfg.queue_name, Message::json(&b"\"c\""[..])).unwrap();
    let launcher = JobLauncher::new(Arc::new(InMemoryJobRepository::new()));

    let exec = launcher.run(&mut passthrough_job(broker.clone(), &cfg), &JobParameters::new())
                       .unwrap();

    assert_eq!(exec.status, BatchStatus::Completed);
    let step = &exec.step_executions[0];
    assert_eq!(step.read_skip_count, 1);
    assert_eq!(step.write_count, 2);
    assert_eq!(broker.unacked_count(), 0);
    assert_eq!(drain_output(broker), vec!["a", "c"]);
}

#[test]
fn best_effort_atomic_publishes_inside_the_ledger_commit() {
    let cfg = BatchConfig { commit_policy: CommitPolicy::BestEffortAtomic,
                            chunk_size: 2,
                            ..config() };
    let broker = broker(&cfg);
    publish(&broker, &cfg, &["x", "y", "z"]);
    let launcher = JobLauncher::new(Arc::new(InMemoryJobRepository::new()));

    let exec = launcher.run(&mut passthrough_job(broker.clone(), &cfg), &JobParameters::new())
                       .unwrap();

    assert_eq!(exec.status, BatchStatus::Completed);
    assert_eq!(exec.step_executions[0].commit_count, 2);
    assert_eq!(drain_output(broker), vec!["x", "y", "z"]);
}

#[test]
fn missing_exchange_fails_before_any_chunk() {
    let cfg = config();
    let broker = Arc::new(InMemoryBroker::new());
    broker.declare_queue(&cfg.queue_name).unwrap();
    publish(&broker, &cfg, &["a"]);
    let launcher = JobLauncher::new(Arc::new(InMemoryJobRepository::new()));

    let err = launcher.run(&mut passthrough_job(broker.clone(), &cfg), &JobParameters::new())
                      .unwrap_err();

    assert!(matches!(err, chunk_core::BatchError::StepConfiguration { .. }));
    assert_eq!(broker.ready_count(&cfg.queue_name).unwrap(), 1);
}

#[test]
fn polling_source_commits_partial_chunks_until_stopped() {
    let cfg = BatchConfig { end_on_timeout: false,
                            chunk_size: 2,
                            ..config() };
    let broker = broker(&cfg);
    publish(&broker, &cfg, &["a"]);
    let launcher = JobLauncher::new(Arc::new(InMemoryJobRepository::new()));
    let mut job = passthrough_job(broker.clone(), &cfg);
    let stop = job.stop_signal();

    let producer = {
        let broker = broker.clone();
        let cfg = cfg.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            publish(&broker, &cfg, &["b", "c"]);
            std::thread::sleep(Duration::from_millis(200));
            stop.request();
        })
    };
    let exec = launcher.run(&mut job, &JobParameters::new()).unwrap();
    producer.join().unwrap();

    assert_eq!(exec.status, BatchStatus::Stopped);
    let step = &exec.step_executions[0];
    // ["a"] se confirma al quedar la cola vacía; ["b", "c"] llena el chunk.
    assert_eq!((step.read_count, step.write_count, step.commit_count), (3, 3, 2));
    assert_eq!(broker.unacked_count(), 0);
    assert_eq!(drain_output(broker), vec!["a", "b", "c"]);
}
