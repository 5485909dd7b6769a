#![no_main]

use libfuzzer_sys::fuzz_target;
use rankd::RankSet;

fuzz_target!(|data: &[u8]| {
    let set = RankSet::new();
    if set.unmarshal(data).is_ok() {
        // Anything accepted must survive its own re-encoding.
        let again = RankSet::new();
        again.unmarshal(&set.marshal().unwrap()).unwrap();
        assert_eq!(again.entries(), set.entries());
    }
});
