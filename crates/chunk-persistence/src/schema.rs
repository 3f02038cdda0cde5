//! Esquema Diesel del ledger de ejecuciones. Debe coincidir con
//! `migrations/2024-01-01-000000_batch_schema/up.sql`.

diesel::table! {
    batch_job_instance (id) {
        id -> BigInt,
        job_name -> Text,
        job_key -> Text,
    }
}

diesel::table! {
    batch_job_execution (id) {
        id -> BigInt,
        job_instance_id -> BigInt,
        parameters -> Jsonb,
        status -> Text,
        exit_description -> Nullable<Text>,
        failed_step -> Nullable<Text>,
        created_at -> Timestamptz,
        started_at -> Nullable<Timestamptz>,
        ended_at -> Nullable<Timestamptz>,
        context -> Jsonb,
        version -> Integer,
    }
}

diesel::table! {
    batch_step_execution (id) {
        id -> BigInt,
        job_execution_id -> BigInt,
        step_name -> Text,
        status -> Text,
        read_count -> BigInt,
        write_count -> BigInt,
        commit_count -> BigInt,
        rollback_count -> BigInt,
        read_skip_count -> BigInt,
        process_skip_count -> BigInt,
        filter_count -> BigInt,
        exit_description -> Nullable<Text>,
        started_at -> Nullable<Timestamptz>,
        ended_at -> Nullable<Timestamptz>,
        context -> Jsonb,
        version -> Integer,
    }
}

diesel::joinable!(batch_job_execution -> batch_job_instance (job_instance_id));
diesel::joinable!(batch_step_execution -> batch_job_execution (job_execution_id));

diesel::allow_tables_to_appear_in_same_query!(batch_job_instance, batch_job_execution, batch_step_execution,);
