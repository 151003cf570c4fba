/*
 * chunksaver_integration.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * End-to-end tests for the streaming chunk store: round-trip chunking at
 * several chunk sizes, deduplication, MIME part segmentation on a nested
 * multipart fixture, and the stream pipeline through the gateway.
 *
 * Run with:
 *   cargo test -p casellario_core --test chunksaver_integration
 */

use std::io::Read;

use casellario_core::backend::stream::write_all;
use casellario_core::backend::Envelope;
use casellario_core::chunk::{shared, ChunkedReader, MemoryStore, PartDecoder, SharedStorage};
use casellario_core::config::ConfigGroup;
use casellario_core::streamers::{chunk_saver, mime_analyzer};
use casellario_core::{ConfigTree, Gateway, MailAddress, ProcessorRegistry, SharedEnvelope};
use serde_json::json;

/// Fixture: multipart/mixed with a nested multipart and a base64 GIF.
const FIXTURE: &[u8] = b"Subject: Fixture\r\n\
From: sender@example.com\r\n\
To: rcpt@example.com\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"outer\"\r\n\
\r\n\
preamble\r\n\
--outer\r\n\
Content-Type: text/plain; charset=us-ascii\r\n\
\r\n\
Hello, this is the cover note.\r\n\
--outer\r\n\
Content-Type: multipart/mixed; boundary=\"middle\"\r\n\
\r\n\
--middle\r\n\
Content-Type: multipart/alternative; boundary=\"inner\"\r\n\
\r\n\
--inner\r\n\
Content-Type: text/plain\r\n\
\r\n\
alternative text body\r\n\
--inner\r\n\
Content-Type: image/gif; name=\"dot.gif\"\r\n\
Content-Transfer-Encoding: base64\r\n\
Content-Disposition: attachment; filename=\"dot.gif\"\r\n\
\r\n\
R0lGODlhAQABAIAAAAAAAP///yH5BAEAAAAALAAAAAABAAEAAAIBRAA7\r\n\
--inner--\r\n\
--middle--\r\n\
--outer--\r\n";

fn fixture_envelope() -> Envelope {
    let mut e = Envelope::default();
    e.helo = "client.example".to_string();
    e.mail_from = MailAddress::parse("sender@example.com");
    e.rcpt_to.push(MailAddress::parse("rcpt@example.com"));
    e
}

/// Build a mimeanalyzer|chunksaver chain over a shared engine and run one
/// message through it, returning the stored message id.
fn save_message(storage: &SharedStorage, chunk_size: usize, message: &[u8]) -> u64 {
    let mut cfg = ConfigGroup::new();
    cfg.set("chunksaver_chunk_size", json!(chunk_size));
    let saver = chunk_saver::with_engine(
        SharedStorage::clone(storage),
        &cfg,
        Box::new(casellario_core::backend::StreamTerminal),
    )
    .unwrap();
    let mut chain = mime_analyzer::factory(&ConfigGroup::new(), saver.processor)
        .unwrap()
        .processor;

    let mut e = fixture_envelope();
    chain.open(&mut e).unwrap();
    // Feed in uneven slices to exercise boundary splits across writes.
    for piece in message.chunks(37) {
        write_all(chain.as_mut(), piece).unwrap();
    }
    chain.close().unwrap();
    e.handoff.message_id.unwrap()
}

#[test]
fn round_trip_chunking_at_every_size() {
    for chunk_size in [1usize, 64, 4096, 16384] {
        let storage = shared(MemoryStore::new());
        let id = save_message(&storage, chunk_size, FIXTURE);
        let mut reader = ChunkedReader::open(SharedStorage::clone(&storage), id).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, FIXTURE, "chunk size {}", chunk_size);
        assert_eq!(reader.email().size as usize, FIXTURE.len());
    }
}

#[test]
fn duplicate_message_deduplicates_chunks() {
    let storage = shared(MemoryStore::new());
    let id1 = save_message(&storage, 64, FIXTURE);
    let id2 = save_message(&storage, 64, FIXTURE);
    assert_ne!(id1, id2);

    let (email1, email2, counts) = {
        let mut guard = storage.lock().unwrap();
        let e1 = guard.get_email(id1).unwrap();
        let e2 = guard.get_email(id2).unwrap();
        let hashes: Vec<_> = e1
            .parts_info
            .parts
            .iter()
            .flat_map(|p| p.chunk_hashes.iter().copied())
            .collect();
        let counts: Vec<u32> = guard
            .get_chunks(&hashes)
            .unwrap()
            .iter()
            .map(|c| c.reference_count)
            .collect();
        (e1, e2, counts)
    };
    // Identical bytes, identical cut points: every chunk is shared.
    assert_eq!(email1.parts_info, email2.parts_info);
    assert!(counts.iter().all(|&c| c == 2), "counts: {:?}", counts);
}

#[test]
fn small_chunk_size_cuts_capacity_chunks() {
    // 130 bytes of plain data with no newline: one part, three chunks.
    let mut data = Vec::new();
    while data.len() < 130 {
        data.push(b"0123456789abcdef"[data.len() % 16]);
    }
    let storage = shared(MemoryStore::new());
    let id = save_message(&storage, 64, &data);

    let email = storage.lock().unwrap().get_email(id).unwrap();
    assert_eq!(email.parts_info.count, 1);
    let hashes = &email.parts_info.parts[0].chunk_hashes;
    assert_eq!(hashes.len(), 3);
    let sizes: Vec<usize> = storage
        .lock()
        .unwrap()
        .get_chunks(hashes)
        .unwrap()
        .iter()
        .map(|c| c.data.len())
        .collect();
    assert_eq!(sizes, vec![64, 64, 2]);

    let mut reader = ChunkedReader::open(storage, id).unwrap();
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    assert_eq!(out, data);
}

#[test]
fn nested_multipart_parts_info() {
    let storage = shared(MemoryStore::new());
    let id = save_message(&storage, 16384, FIXTURE);
    let email = storage.lock().unwrap().get_email(id).unwrap();
    let info = &email.parts_info;

    assert_eq!(info.count as usize, info.parts.len());
    let ids: Vec<&str> = info.parts.iter().map(|p| p.part_id.as_str()).collect();
    for want in ["1", "1.1", "1.2", "1.2.1", "1.2.1.1", "1.2.1.2"] {
        assert!(ids.contains(&want), "missing part {} in {:?}", want, ids);
    }
    assert!(info.has_attach);
    assert!(info.text_part >= 0);
    assert_eq!(info.html_part, -1);
    assert_eq!(email.subject, "Fixture");

    // The attachment part keeps its declared metadata.
    let gif = info
        .parts
        .iter()
        .find(|p| p.part_id == "1.2.1.2")
        .unwrap();
    assert_eq!(gif.content_type, "image/gif");
    assert_eq!(gif.transfer_encoding, "base64");
    assert_eq!(gif.content_disposition, "attachment");
}

#[test]
fn part_decoder_unwraps_the_gif() {
    let storage = shared(MemoryStore::new());
    let id = save_message(&storage, 16384, FIXTURE);
    let email = storage.lock().unwrap().get_email(id).unwrap();
    let gif_index = email
        .parts_info
        .parts
        .iter()
        .position(|p| p.part_id == "1.2.1.2")
        .unwrap();
    let mut decoder = PartDecoder::open(storage, id, gif_index).unwrap();
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).unwrap();
    // The decoded attachment is a GIF89a image.
    assert!(out.starts_with(b"GIF89a"), "got {:?}", &out[..6.min(out.len())]);
}

#[test]
fn gateway_stream_pipeline_saves_chunks() {
    let storage = shared(MemoryStore::new());
    let mut registry = ProcessorRegistry::with_defaults();
    let engine = SharedStorage::clone(&storage);
    registry.register_stream("chunksaver", move |cfg, next| {
        chunk_saver::with_engine(SharedStorage::clone(&engine), cfg, next)
    });

    let tree = ConfigTree::from_json(
        r#"{"stream_processors": {"chunksaver": {"chunksaver_chunk_size": 64}},
            "gateways": {"default": {
                "save_stream": "mimeanalyzer|chunksaver",
                "stream_buffer_size": 31
            }}}"#,
    )
    .unwrap();
    let gw = Gateway::new("default", tree, registry).unwrap();
    gw.initialize().unwrap();
    gw.start().unwrap();

    let env = SharedEnvelope::new(fixture_envelope());
    let result = gw.process_stream(&env, Box::new(FIXTURE));
    assert!(result.is_success(), "got {}", result);
    gw.shutdown().unwrap();

    let id = env.lock().handoff.message_id.unwrap();
    let mut reader = ChunkedReader::open(storage, id).unwrap();
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    assert_eq!(out, FIXTURE);
}
