// Esquema Diesel compartido por SQLite y Postgres.
// Ids como Text, marcas de tiempo como BigInt (microsegundos UTC) y
// estructuras anidadas serializadas como JSON en Text.
use diesel::allow_tables_to_appear_in_same_query;
diesel::table! {
    processes (id) {
        id -> Text,
        name -> Text,
        version -> BigInt,
        spec -> Text,
        created_at_ts -> BigInt,
    }
}
diesel::table! {
    campaigns (id) {
        id -> Text,
        process_id -> Text,
        name -> Text,
        description -> Nullable<Text>,
        status -> Text,
        strategies -> Text,
        metadata -> Text,
        created_at_ts -> BigInt,
        updated_at_ts -> BigInt,
    }
}
diesel::table! {
    observations (id) {
        id -> Text,
        campaign_id -> Text,
        seq -> BigInt,
        x_raw -> Text,
        x_encoded -> Text,
        y -> Text,
        source -> Text,
        observed_at_ts -> BigInt,
        metadata -> Text,
        created_at_ts -> BigInt,
    }
}
diesel::table! {
    iterations (id) {
        id -> Text,
        campaign_id -> Text,
        idx -> BigInt,
        dataset_hash -> Text,
        metadata -> Text,
        created_at_ts -> BigInt,
    }
}
diesel::table! {
    proposals (id) {
        id -> Text,
        iteration_id -> Text,
        seq -> BigInt,
        strategy_name -> Text,
        candidates -> Text,
        candidates_encoded -> Nullable<Text>,
        scores -> Nullable<Text>,
        predictions -> Nullable<Text>,
        metadata -> Text,
        created_at_ts -> BigInt,
    }
}
diesel::table! {
    decisions (id) {
        id -> Text,
        iteration_id -> Text,
        accepted -> Text,
        notes -> Nullable<Text>,
        created_at_ts -> BigInt,
    }
}
diesel::table! {
    jobs (id) {
        id -> Text,
        campaign_id -> Nullable<Text>,
        job_type -> Text,
        status -> Text,
        params -> Text,
        result -> Nullable<Text>,
        error -> Nullable<Text>,
        created_at_ts -> BigInt,
        started_at_ts -> Nullable<BigInt>,
        completed_at_ts -> Nullable<BigInt>,
        worker_id -> Nullable<Text>,
        heartbeat_at_ts -> Nullable<BigInt>,
        progress -> Double,
    }
}
diesel::table! {
    checkpoints (id) {
        id -> Text,
        campaign_id -> Text,
        iteration_id -> Text,
        seq -> BigInt,
        blob_key -> Text,
        size_bytes -> BigInt,
        metadata -> Text,
        created_at_ts -> BigInt,
    }
}
diesel::table! {
    campaign_leases (campaign_id) {
        campaign_id -> Text,
        token -> Text,
        fence -> Text,
        acquired_at_ts -> BigInt,
        expires_at_ts -> BigInt,
    }
}
allow_tables_to_appear_in_same_query!(processes,
                                      campaigns,
                                      observations,
                                      iterations,
                                      proposals,
                                      decisions,
                                      jobs,
                                      checkpoints,
                                      campaign_leases);
