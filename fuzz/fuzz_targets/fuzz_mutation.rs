#![no_main]

use ferrite_fuzzer::corpus::RawCommand;
use ferrite_fuzzer::mutation::{mutate, Strategy};
use libfuzzer_sys::fuzz_target;
use rand::rngs::StdRng;
use rand::SeedableRng;

fuzz_target!(|data: &[u8]| {
    if data.len() < 8 {
        return;
    }
    let (seed, line) = data.split_at(8);
    let mut seed_bytes = [0u8; 8];
    seed_bytes.copy_from_slice(seed);
    let mut rng = StdRng::seed_from_u64(u64::from_le_bytes(seed_bytes));

    let raw = RawCommand::new(String::from_utf8_lossy(line));
    let mutated = mutate(&raw, true, &mut rng);
    let _ = mutated.args();
    let _ = mutated.display();

    for strategy in Strategy::ALL {
        let out = strategy.apply(raw.as_bytes(), &mut rng);
        let _ = out.len();
    }
});
