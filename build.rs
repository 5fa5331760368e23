fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut prost_config = prost_build::Config::new();
    // `Value` is self-referential through `optional`/`Variant.value`; prost
    // needs explicit boxing to give these a finite size.
    prost_config.boxed(["wayfinder.ledger.v2.Value.optional", "wayfinder.ledger.v2.Variant.value"]);

    tonic_build::configure()
        .build_server(false)
        .compile_with_config(prost_config, &["proto/ledger.proto"], &["proto"])?;
    Ok(())
}
