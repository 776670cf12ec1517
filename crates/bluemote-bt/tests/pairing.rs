//! HCI-level behavior as seen by the console's Bluetooth stack.

use bluemote_bt::BtChip;

const REMOTE_0: [u8; 6] = [0x78, 0x2C, 0xE5, 0xAA, 0x22, 0x01];

/// Polls until one complete event has been reassembled from its
/// 16-byte transport chunks.
fn next_event(chip: &mut BtChip, now_ms: u32) -> Vec<u8> {
    let mut evt = Vec::new();
    for _ in 0..64 {
        let mut buf = [0u8; 19];
        let n = chip.poll_event(now_ms, &mut buf);
        if n > 0 {
            evt.extend_from_slice(&buf[..n]);
        }
        if evt.len() >= 2 && evt.len() == 2 + evt[1] as usize {
            return evt;
        }
    }
    panic!("no complete event produced, got {evt:02X?}");
}

fn assert_idle(chip: &mut BtChip, now_ms: u32) {
    let mut buf = [0u8; 19];
    for _ in 0..4 {
        assert_eq!(chip.poll_event(now_ms, &mut buf), 0);
    }
}

#[test]
fn reset_completes_then_reports_address() {
    let mut chip = BtChip::new();

    chip.submit_command(&[0x03, 0x0C, 0x00]);
    let evt = next_event(&mut chip, 0);
    assert_eq!(evt, vec![0x0E, 0x04, 0x01, 0x03, 0x0C, 0x00]);

    chip.submit_command(&[0x09, 0x10, 0x00]);
    let evt = next_event(&mut chip, 10);
    assert_eq!(
        evt,
        vec![0x0E, 0x0A, 0x01, 0x09, 0x10, 0x00, 0xA0, 0x35, 0xA3, 0xA3, 0xBD, 0x58]
    );

    assert_idle(&mut chip, 20);
}

#[test]
fn local_version_blob_matches_module() {
    let mut chip = BtChip::new();
    chip.submit_command(&[0x01, 0x10, 0x00]);
    let evt = next_event(&mut chip, 0);
    assert_eq!(
        evt,
        vec![0x0E, 0x0C, 0x01, 0x01, 0x10, 0x00, 0x03, 0xA7, 0x40, 0x03, 0x0F, 0x00, 0x0E, 0x43]
    );
}

#[test]
fn inquiry_without_sync_press_finds_nothing() {
    let mut chip = BtChip::new();
    chip.submit_command(&[0x01, 0x04, 0x05, 0x33, 0x8B, 0x9E, 0x30, 0x00]);

    let status = next_event(&mut chip, 0);
    assert_eq!(status, vec![0x0F, 0x04, 0x00, 0x01, 0x01, 0x04]);

    let result = next_event(&mut chip, 10);
    assert_eq!(result, vec![0x22, 0x01, 0x00]);

    let complete = next_event(&mut chip, 20);
    assert_eq!(complete, vec![0x01, 0x01, 0x00]);
}

#[test]
fn remote_name_is_drained_in_transport_chunks() {
    let mut chip = BtChip::new();

    let mut cmd = vec![0x19, 0x04, 0x0A];
    cmd.extend_from_slice(&REMOTE_0);
    cmd.extend_from_slice(&[0x01, 0x00, 0x00, 0x00]);
    chip.submit_command(&cmd);

    let status = next_event(&mut chip, 0);
    assert_eq!(status[0], 0x0F);

    // The name event is 257 bytes on the wire; the first poll after
    // formatting must cap at 16.
    let mut buf = [0u8; 19];
    assert_eq!(chip.poll_event(10, &mut buf), 0); // formats the event
    assert_eq!(chip.poll_event(10, &mut buf), 16);
    assert_eq!(buf[0], 0x07);
    assert_eq!(buf[1], 0xFF);

    let mut evt = buf[..16].to_vec();
    while evt.len() < 257 {
        let n = chip.poll_event(10, &mut buf);
        assert!(n > 0 && n <= 16);
        evt.extend_from_slice(&buf[..n]);
    }
    assert_eq!(evt.len(), 257);
    assert_eq!(&evt[3..9], &REMOTE_0);
    assert_eq!(&evt[9..28], b"Nintendo RVL-CNT-01");
    assert!(evt[28..].iter().all(|b| *b == 0));
}

#[test]
fn stored_link_keys_are_returned_for_all_four_remotes() {
    let mut chip = BtChip::new();
    chip.submit_command(&[0x0D, 0x0C, 0x07, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]);

    let keys = next_event(&mut chip, 0);
    assert_eq!(keys[0], 0x15);
    assert_eq!(keys[1], 89);
    assert_eq!(keys[2], 4);
    for i in 0..4 {
        let at = 3 + 22 * i;
        assert_eq!(keys[at + 5], 0x01 + i as u8); // last address byte
        assert_eq!(keys[at + 6], 0x58); // first key byte
    }

    let complete = next_event(&mut chip, 10);
    assert_eq!(complete, vec![0x0E, 0x04, 0x01, 0x0D, 0x0C, 0x00]);
}

#[test]
fn authentication_walks_pin_fallback() {
    let mut chip = BtChip::new();

    // Authentication Requested on handle 0x000B.
    chip.submit_command(&[0x11, 0x04, 0x02, 0x0B, 0x00]);
    assert_eq!(next_event(&mut chip, 0)[0], 0x0F);
    let link_key_request = next_event(&mut chip, 10);
    assert_eq!(link_key_request[0], 0x17);
    assert_eq!(&link_key_request[2..8], &REMOTE_0);

    // Console has no key: negative reply, then a PIN code request.
    let mut cmd = vec![0x0C, 0x04, 0x06];
    cmd.extend_from_slice(&REMOTE_0);
    chip.submit_command(&cmd);
    let complete = next_event(&mut chip, 20);
    assert_eq!(complete[0], 0x0E);
    assert_eq!(&complete[6..12], &REMOTE_0);
    assert_eq!(next_event(&mut chip, 30)[0], 0x16);

    // PIN reply mints a link key and finishes authentication.
    let mut cmd = vec![0x0D, 0x04, 0x17];
    cmd.extend_from_slice(&REMOTE_0);
    cmd.push(6);
    cmd.extend_from_slice(&REMOTE_0);
    cmd.extend_from_slice(&[0u8; 10]);
    chip.submit_command(&cmd);
    assert_eq!(next_event(&mut chip, 40)[0], 0x0E);
    let notification = next_event(&mut chip, 50);
    assert_eq!(notification[0], 0x18);
    assert_eq!(&notification[2..8], &REMOTE_0);
    assert_eq!(notification[8], 0x58);
    let auth = next_event(&mut chip, 60);
    assert_eq!(auth, vec![0x06, 0x03, 0x00, 0x0B, 0x00]);
}

#[test]
fn change_packet_type_is_rejected_like_the_real_module() {
    let mut chip = BtChip::new();
    chip.submit_command(&[0x0F, 0x04, 0x04, 0x0B, 0x00, 0x18, 0xCC]);
    let status = next_event(&mut chip, 0);
    assert_eq!(status, vec![0x0F, 0x04, 0x12, 0x01, 0x0F, 0x04]);
    assert_idle(&mut chip, 10);
}

#[test]
fn completed_packets_event_waits_for_two_frames() {
    let mut chip = BtChip::new();

    // Two inbound ACL frames on handle 0x000B (payload is an SDP-ish
    // frame on an unknown CID, which is accepted and ignored).
    let packet = [
        0x0B, 0x20, 0x08, 0x00, // ACL header
        0x04, 0x00, 0x99, 0x00, // B-frame: len 4, cid 0x0099
        0xDE, 0xAD, 0xBE, 0xEF,
    ];
    chip.receive_acl(&packet);
    assert_idle(&mut chip, 0);

    chip.receive_acl(&packet);
    let mut buf = [0u8; 19];
    let n = chip.poll_event(10, &mut buf);
    assert_eq!(n, 7);
    assert_eq!(&buf[..7], &[0x13, 0x05, 0x01, 0x0B, 0x00, 0x02, 0x00]);

    // Counters were flushed with the event.
    assert_idle(&mut chip, 20);
}

#[test]
fn write_scan_enable_only_pairs_once_named_wii() {
    let mut chip = BtChip::new();

    // Page scan before the rename: not ready yet.
    chip.submit_command(&[0x1A, 0x0C, 0x01, 0x02]);
    next_event(&mut chip, 0);

    let mut cmd = vec![0x13, 0x0C, 0x04];
    cmd.extend_from_slice(b"Wii\0");
    chip.submit_command(&cmd);
    next_event(&mut chip, 10);

    // Name reads back as written.
    chip.submit_command(&[0x14, 0x0C, 0x00]);
    let name = next_event(&mut chip, 20);
    assert_eq!(name[1], 252);
    assert_eq!(&name[6..9], b"Wii");

    chip.submit_command(&[0x1A, 0x0C, 0x01, 0x02]);
    next_event(&mut chip, 30);

    // Readiness is observable through the sync frame: freshly reset
    // devices pick the flag up after their holdoff.
    let frame = chip.sync_frame(600);
    assert_eq!(frame[0] & 0x08, 0x00);
    let reply = [0u8; 128];
    chip.apply_frame(600, &reply);
    let frame = chip.sync_frame(615);
    assert_eq!(frame[0] & 0x08, 0x08);
}
