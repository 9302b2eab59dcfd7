//! Workspace-level integration suite: drives a real `jobmeshd` through the
//! `jobmesh` CLI (spec §6). Most specs need `JOBMESH_TEST_POSTGRES_URL`
//! pointed at a scratch Postgres database; see `prelude::postgres_url`.

mod prelude;

mod job {
    mod cancel;
    mod submit_status;
}

mod daemon {
    mod dlq_list;
    mod recover_in_flight;
}

mod cli {
    mod help;
}
