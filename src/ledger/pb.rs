//! Generated client stubs and message types for the ledger's v2 API,
//! compiled from `proto/ledger.proto` by `build.rs`.

tonic::include_proto!("wayfinder.ledger.v2");
