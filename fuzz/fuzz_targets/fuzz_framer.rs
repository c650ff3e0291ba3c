#![no_main]

use libfuzzer_sys::fuzz_target;
use packet_tcp::core::envelope::EnvelopeCodec;
use packet_tcp::core::framer::StreamFramer;
use packet_tcp::core::registry::TypeRegistry;
use packet_tcp::core::serialization::SerializationFormat;
use std::sync::Arc;

#[derive(serde::Serialize, serde::Deserialize)]
struct Probe {
    id: u32,
    text: String,
}

fuzz_target!(|data: &[u8]| {
    // Fuzz the stream framer and envelope decoder - test for panics, crashes, infinite loops
    let mut registry = TypeRegistry::new();
    if registry.register::<Probe>("fuzz.Probe").is_err() {
        return;
    }
    let registry = Arc::new(registry);

    // first byte picks the read size so splits vary with the input
    let chunk = data.first().map_or(1, |b| usize::from(*b).max(1));
    let mut framer = StreamFramer::new();
    for format in [
        SerializationFormat::Json,
        SerializationFormat::Bincode,
        SerializationFormat::MessagePack,
    ] {
        let codec = EnvelopeCodec::new(Arc::clone(&registry), format, None, 4096);
        for piece in data.chunks(chunk) {
            for frame in framer.resolve(piece) {
                let _ = codec.decode(&frame);
            }
        }
        let _ = codec.decode(data);
    }
});
