//! Measure instruction encoding latency; the benchmarking is feature-gated
//! on `x86` since it only measures the encoding mechanism of that backend.

#[cfg(feature = "x86")]
mod x86 {
    use criterion::{criterion_group, Criterion};
    use lanegen::x64::encoding::evex::{EvexInstruction, EvexVectorLength};
    use lanegen::x64::encoding::rex::{LegacyPrefixes, OpcodeMap};
    use lanegen::x64::encoding::vex::{VexInstruction, VexVectorLength};

    fn prefix_encoding_benchmarks(c: &mut Criterion) {
        let mut group = c.benchmark_group("x64 prefix encoding");

        group.bench_function("EvexInstruction (builder pattern)", |b| {
            let mut sink = vec![];
            b.iter(|| {
                sink.clear();
                EvexInstruction::new()
                    .length(EvexVectorLength::V512)
                    .prefix(LegacyPrefixes::_66)
                    .map(OpcodeMap::_0F)
                    .w(false)
                    .opcode(0xED)
                    .reg(0)
                    .vvvvv(4)
                    .rm(8u8)
                    .encode(&mut sink);
            });
        });

        group.bench_function("VexInstruction (builder pattern)", |b| {
            let mut sink = vec![];
            b.iter(|| {
                sink.clear();
                VexInstruction::new()
                    .length(VexVectorLength::V256)
                    .prefix(LegacyPrefixes::_66)
                    .map(OpcodeMap::_0F)
                    .opcode(0xED)
                    .reg(0)
                    .vvvv(4)
                    .rm(8u8)
                    .encode(&mut sink);
            });
        });
    }
    criterion_group!(benches, prefix_encoding_benchmarks);

    /// Using an inner module to feature-gate the benchmarks means that we
    /// must manually specify how to run them (see `criterion_main!`).
    pub fn run_benchmarks() {
        benches();
        Criterion::default().configure_from_args().final_summary();
    }
}

fn main() {
    #[cfg(feature = "x86")]
    x86::run_benchmarks();

    #[cfg(not(feature = "x86"))]
    println!("Unable to run the evex-encoding benchmark; the `x86` feature must be enabled.");
}
