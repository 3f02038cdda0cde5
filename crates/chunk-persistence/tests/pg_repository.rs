use std::sync::Arc;

use chunk_core::{BatchStatus, FnProcessor, ItemError, Job, JobLauncher, JobParameters, JobRepository,
                 RepositoryError, StepBuilder, VecSink, VecSource};
mod test_support;
use test_support::{repository, unique_job};

macro_rules! require_db {
    () => {
        match repository() {
            Some(repo) => repo,
            None => {
                eprintln!("skip (no DATABASE_URL)");
                return;
            }
        }
    };
}

#[test]
fn instance_lifecycle_matches_in_memory_rules() {
    let repo = require_db!();
    let job = unique_job("lifecycle");
    let params = JobParameters::new().with("run", "1").with("date", "2024-01-01");

    let mut first = repo.create_job_execution(&job, &params).unwrap();
    assert_eq!(first.status, BatchStatus::Starting);
    assert_eq!(first.parameters, params);
    assert!(matches!(repo.create_job_execution(&job, &params),
                     Err(RepositoryError::AlreadyRunning { .. })));

    first.finish(BatchStatus::Failed, Some("boom".into()));
    repo.update_job_execution(&mut first).unwrap();
    assert_eq!(first.version, 1);

    let second = repo.create_job_execution(&job, &params).unwrap();
    assert!(second.id > first.id);
    assert_eq!(second.instance, first.instance);

    let last = repo.find_last_job_execution(&job, &params).unwrap().unwrap();
    assert_eq!(last.id, second.id);
    let reloaded = repo.get_job_execution(first.id).unwrap().unwrap();
    assert_eq!(reloaded.status, BatchStatus::Failed);
    assert_eq!(reloaded.exit_description.as_deref(), Some("boom"));
}

#[test]
fn completed_instance_cannot_run_again() {
    let repo = require_db!();
    let job = unique_job("complete");
    let params = JobParameters::new();
    let mut exec = repo.create_job_execution(&job, &params).unwrap();
    exec.finish(BatchStatus::Completed, None);
    repo.update_job_execution(&mut exec).unwrap();
    assert!(matches!(repo.create_job_execution(&job, &params),
                     Err(RepositoryError::AlreadyComplete { .. })));
}

#[test]
fn stale_step_version_is_rejected() {
    let repo = require_db!();
    let exec = repo.create_job_execution(&unique_job("version"), &JobParameters::new())
                   .unwrap();
    let mut step = repo.create_step_execution(&exec, "step").unwrap();
    let mut stale = step.clone();

    step.commit_count = 1;
    step.context.put("reader.read.count", 2u64);
    repo.update_step_execution(&mut step).unwrap();
    assert_eq!(step.version, 1);
    assert!(!step.context.is_dirty());

    stale.commit_count = 9;
    let err = repo.update_step_execution(&mut stale).unwrap_err();
    assert_eq!(err, RepositoryError::VersionConflict { id: step.id, expected: 0 });
    assert_eq!(stale.version, 0);

    let stored = repo.find_step_executions(exec.id).unwrap();
    assert_eq!(stored[0].commit_count, 1);
    assert_eq!(stored[0].context.get_u64("reader.read.count"), Some(2));
}

#[test]
fn failing_hook_rolls_the_step_update_back() {
    let repo = require_db!();
    let exec = repo.create_job_execution(&unique_job("hook"), &JobParameters::new())
                   .unwrap();
    let mut step = repo.create_step_execution(&exec, "step").unwrap();
    step.write_count = 5;

    let err = repo.update_step_execution_within(&mut step, &mut || Err(ItemError::Transport("sink down".into())))
                  .unwrap_err();
    assert!(matches!(err, RepositoryError::Hook(ItemError::Transport(_))));
    assert_eq!(step.version, 0);
    assert_eq!(repo.find_step_executions(exec.id).unwrap()[0].write_count, 0);

    let mut calls = 0;
    repo.update_step_execution_within(&mut step, &mut || {
            calls += 1;
            Ok(())
        })
        .unwrap();
    assert_eq!(calls, 1);
    assert_eq!(repo.find_step_executions(exec.id).unwrap()[0].write_count, 5);
}

#[test]
fn last_step_execution_spans_every_execution_of_the_instance() {
    let repo = require_db!();
    let job = unique_job("last-step");
    let params = JobParameters::new().with("run", "1");
    let mut first = repo.create_job_execution(&job, &params).unwrap();
    let old = repo.create_step_execution(&first, "step").unwrap();
    first.finish(BatchStatus::Stopped, None);
    repo.update_job_execution(&mut first).unwrap();

    let second = repo.create_job_execution(&job, &params).unwrap();
    let newer = repo.create_step_execution(&second, "step").unwrap();
    let found = repo.find_last_step_execution(second.instance.id, "step")
                    .unwrap()
                    .unwrap();
    assert_eq!(found.id, newer.id);
    assert_ne!(found.id, old.id);
    assert!(repo.find_last_step_execution(second.instance.id, "other").unwrap().is_none());
}

#[test]
fn launcher_resumes_from_the_postgres_ledger() {
    let repo = require_db!();
    let launcher = JobLauncher::new(Arc::new(repo));
    let job_name = unique_job("numbers");
    let params = JobParameters::new().with("batch", "1");

    let build = |fail_on: Option<u32>, sink: VecSink<u32>| -> Job {
        let step = StepBuilder::new("step").chunk_size(2)
                                           .reader(VecSource::with_name("numbers", (1..=6).collect::<Vec<u32>>()))
                                           .processor(FnProcessor::new(move |n: u32| {
                                               if Some(n) == fail_on {
                                                   Err(ItemError::Transport(format!("cannot handle {n}")))
                                               } else {
                                                   Ok(Some(n))
                                               }
                                           }))
                                           .writer(sink)
                                           .build()
                                           .unwrap();
        Job::builder(job_name.clone()).first_step(step).build().unwrap()
    };

    let first_sink = VecSink::new();
    let first_out = first_sink.handle();
    let failed = launcher.run(&mut build(Some(5), first_sink), &params).unwrap();
    assert_eq!(failed.status, BatchStatus::Failed);
    assert_eq!(first_out.items(), vec![1, 2, 3, 4]);

    let second_sink = VecSink::new();
    let second_out = second_sink.handle();
    let resumed = launcher.restart(&mut build(None, second_sink), failed.id).unwrap();
    assert_eq!(resumed.status, BatchStatus::Completed);
    assert_eq!(second_out.items(), vec![5, 6]);
    let step = &resumed.step_executions[0];
    assert_eq!(step.context.get_u64("numbers.read.count"), Some(6));

    let stored = launcher.repository().get_job_execution(resumed.id).unwrap().unwrap();
    assert_eq!(stored.status, BatchStatus::Completed);
    assert_eq!(stored.step_executions.len(), 1);
}
