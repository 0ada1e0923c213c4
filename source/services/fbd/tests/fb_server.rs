//! CONTEXT: Integration tests for the framebuffer service loop
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 9 integration tests
//!
//! TEST_SCOPE:
//!   - Text grid, glyph rendering and snapshots over IPC
//!   - Single-client admission and hangup cleanup
//!   - Shared memory bitmaps, text blocks and animations

use std::thread::{self, JoinHandle};
use std::time::Duration;

use fbd::shm::{TextCell, TEXT_AREA_ID};
use fbd::{FbClient, FbConfig, FbServer};
use nexus_abi::fb::CURRENT_VIEWPORT;
use nexus_abi::{AreaFlags, Errno};
use nexus_ipc::{answerbox, connect_me_to, ExchangeMgmt, IpcError, Port, Session, SharedArea};

const RED: [u8; 4] = [0x00, 0x00, 0xff, 0x00];
const BLACK: [u8; 4] = [0x00, 0x00, 0x00, 0x00];
const BACKGROUND: [u8; 4] = [0xf0, 0xf0, 0xf0, 0x00];

fn start(config: FbConfig) -> (Port, JoinHandle<FbServer>) {
    let (port, inbox) = answerbox();
    let thread = thread::spawn(move || {
        let mut server = FbServer::new(&config).unwrap();
        server.run(&inbox).unwrap();
        server
    });
    (port, thread)
}

fn connect(port: &Port) -> FbClient {
    FbClient::new(Session::new(ExchangeMgmt::Exclusive, connect_me_to(port, &[]).unwrap()))
}

/// Stops the loop and hands back its state. Clients still connected keep their resources.
fn stop(port: Port, thread: JoinHandle<FbServer>) -> FbServer {
    port.shutdown();
    thread.join().unwrap()
}

fn status(errno: Errno) -> IpcError {
    IpcError::Status(errno)
}

fn red_ppm() -> SharedArea {
    let mut bytes = b"P6\n# 2x2 red\n2 2\n255\n".to_vec();
    bytes.extend_from_slice(&[255, 0, 0].repeat(4));
    SharedArea::from_bytes(bytes, AreaFlags::READ)
}

#[test]
fn letter_a_in_an_80x25_viewport() {
    let (port, thread) = start(FbConfig::default());
    let fb = connect(&port);
    assert_eq!(fb.resolution().unwrap(), (640, 480));
    assert_eq!(fb.grid_size().unwrap(), (30, 80));
    let vp = fb.viewport_create(0, 0, 640, 400).unwrap();
    fb.viewport_switch(vp).unwrap();
    assert_eq!(fb.grid_size().unwrap(), (25, 80));
    fb.clear().unwrap();
    fb.put_char(b'A', 0, 0).unwrap();
    assert_eq!(fb.put_char(b'A', 25, 0), Err(status(Errno::InvalidArgument)));
    let pm = fb.viewport_to_pixmap(CURRENT_VIEWPORT).unwrap();

    let server = stop(port, thread);
    let pixmap = server.pixmap(pm).unwrap();
    assert_eq!((pixmap.width(), pixmap.height()), (640, 400));
    // Top scanline of 'A' lights columns 2 and 3.
    assert_eq!(pixmap.pixel(2, 0), Some(&BLACK[..]));
    assert_eq!(pixmap.pixel(3, 1), Some(&BLACK[..]));
    assert_eq!(pixmap.pixel(0, 0), Some(&BACKGROUND[..]));
    assert_eq!(pixmap.pixel(8, 0), Some(&BACKGROUND[..]));
    assert_eq!(pixmap.pixel(639, 399), Some(&BACKGROUND[..]));
    assert_eq!(server.viewport(vp).unwrap().cell(0, 0), Some(b'A'));
    drop(fb);
}

#[test]
fn second_client_is_refused_until_first_hangs_up() {
    let (port, thread) = start(FbConfig::default());
    let first = connect(&port);
    let err = connect_me_to(&port, &[]).unwrap_err();
    assert_eq!(err, status(Errno::ResourceLimit));
    first.grid_size().unwrap();

    drop(first);
    let second = connect(&port);
    assert_eq!(second.grid_size().unwrap(), (30, 80));
    let server = stop(port, thread);
    assert!(server.client().is_some());
    drop(second);
}

#[test]
fn hangup_releases_client_resources() {
    let (port, thread) = start(FbConfig::default());
    let first = connect(&port);
    let vp = first.viewport_create(0, 0, 64, 32).unwrap();
    let pm = first.viewport_to_pixmap(vp).unwrap();
    let anim = first.animation_create(vp).unwrap();
    first.animation_add_frame(anim, pm).unwrap();
    first.animation_start(anim).unwrap();
    first.viewport_switch(vp).unwrap();
    first.prepare_shared(3).unwrap();
    drop(first);

    let second = connect(&port);
    assert_eq!(second.grid_size().unwrap(), (30, 80));
    assert_eq!(second.viewport_switch(vp), Err(status(Errno::AddressUnavailable)));
    assert_eq!(second.animation_start(anim), Err(status(Errno::InvalidArgument)));
    second.drop_pixmap(pm).unwrap();
    // The old negotiation is gone, so another id can be prepared.
    second.prepare_shared(4).unwrap();

    let server = stop(port, thread);
    assert_eq!(server.viewport_count(), 1);
    assert_eq!(server.pixmap_count(), 0);
    assert_eq!(server.animations().enabled_count(), 0);
    assert_eq!(server.current_viewport(), 0);
    drop(second);
}

#[test]
fn animation_argument_errors() {
    let (port, thread) = start(FbConfig::default());
    let fb = connect(&port);
    assert_eq!(fb.animation_create(999), Err(status(Errno::InvalidArgument)));
    let anim = fb.animation_create(CURRENT_VIEWPORT).unwrap();
    assert_eq!(fb.animation_add_frame(anim, 5), Err(status(Errno::InvalidArgument)));
    assert_eq!(fb.animation_add_frame(7, 0), Err(status(Errno::InvalidArgument)));
    assert_eq!(fb.animation_retarget(anim, 999), Err(status(Errno::InvalidArgument)));
    assert_eq!(fb.animation_start(3), Err(status(Errno::InvalidArgument)));

    let pm = fb.viewport_to_pixmap(0).unwrap();
    for _ in 0..fbd::animation::MAX_ANIM_LEN {
        fb.animation_add_frame(anim, pm).unwrap();
    }
    assert_eq!(fb.animation_add_frame(anim, pm), Err(status(Errno::ResourceLimit)));
    fb.animation_start(anim).unwrap();
    fb.animation_stop(anim).unwrap();
    fb.animation_drop(anim).unwrap();
    assert_eq!(fb.animation_drop(anim), Err(status(Errno::InvalidArgument)));

    let server = stop(port, thread);
    assert_eq!(server.animations().enabled_count(), 0);
    drop(fb);
}

#[test]
fn shared_bitmap_protocol() {
    let (port, thread) = start(FbConfig::default());
    let fb = connect(&port);
    assert_eq!(fb.draw_shared(0, 0), Err(status(Errno::InvalidArgument)));
    assert_eq!(fb.shared_to_pixmap(), Err(status(Errno::InvalidArgument)));
    assert_eq!(fb.prepare_shared(0), Err(status(Errno::InvalidArgument)));
    fb.prepare_shared(7).unwrap();
    fb.prepare_shared(7).unwrap();
    assert_eq!(fb.prepare_shared(8), Err(status(Errno::Busy)));
    assert_eq!(fb.share(9, &red_ppm()), Err(status(Errno::InvalidArgument)));

    fb.share(7, &red_ppm()).unwrap();
    let pm = fb.shared_to_pixmap().unwrap();
    fb.draw_shared(0, 0).unwrap();
    assert_eq!(fb.draw_shared(640, 0), Err(status(Errno::InvalidArgument)));
    fb.drop_shared().unwrap();

    fb.prepare_shared(8).unwrap();
    let junk = SharedArea::from_bytes(b"GIF89a".to_vec(), AreaFlags::READ);
    assert_eq!(fb.share(8, &junk), Err(status(Errno::InvalidData)));
    assert_eq!(fb.shared_to_pixmap(), Err(status(Errno::InvalidArgument)));

    let server = stop(port, thread);
    let pixmap = server.pixmap(pm).unwrap();
    assert_eq!((pixmap.width(), pixmap.height()), (2, 2));
    assert_eq!(pixmap.pixel(1, 1), Some(&RED[..]));
    assert_eq!(server.screen().pixel(1, 1), Some(&RED[..]));
    assert_eq!(server.screen().pixel(2, 0), Some(&BACKGROUND[..]));
    drop(fb);
}

#[test]
fn text_block_draws_whole_grid() {
    let (port, thread) = start(FbConfig::default());
    let fb = connect(&port);
    let vp = fb.viewport_create(0, 0, 16, 32).unwrap();
    fb.viewport_switch(vp).unwrap();
    assert_eq!(fb.draw_text_block(), Err(status(Errno::InvalidArgument)));

    let bytes: Vec<u8> = "abcd"
        .chars()
        .map(|c| TextCell { character: c as u32, fg: 0, bg: 0xffffff })
        .flat_map(|cell| cell.encode())
        .collect();
    fb.share(TEXT_AREA_ID, &SharedArea::from_bytes(bytes, AreaFlags::READ)).unwrap();
    fb.draw_text_block().unwrap();
    fb.viewport_switch(0).unwrap();
    assert_eq!(fb.draw_text_block(), Err(status(Errno::InvalidArgument)));

    let server = stop(port, thread);
    let grid = server.viewport(vp).unwrap();
    assert_eq!(grid.cell(0, 0), Some(b'a'));
    assert_eq!(grid.cell(1, 1), Some(b'd'));
    drop(fb);
}

#[test]
fn animations_advance_on_timeout() {
    let config = FbConfig::from_toml_str("[timing]\ntick_ms = 10\nanim_rate_divisor = 1").unwrap();
    let (port, thread) = start(config);
    let fb = connect(&port);
    let vp = fb.viewport_create(100, 100, 8, 16).unwrap();
    fb.prepare_shared(1).unwrap();
    fb.share(1, &red_ppm()).unwrap();
    let pm = fb.shared_to_pixmap().unwrap();
    let anim = fb.animation_create(vp).unwrap();
    fb.animation_add_frame(anim, pm).unwrap();
    fb.animation_start(anim).unwrap();
    thread::sleep(Duration::from_millis(150));

    let server = stop(port, thread);
    assert_eq!(server.screen().pixel(100, 100), Some(&RED[..]));
    assert_eq!(server.screen().pixel(101, 101), Some(&RED[..]));
    assert_eq!(server.screen().pixel(102, 100), Some(&BACKGROUND[..]));
    assert!(server.background_pending());
    drop(fb);
}

#[test]
fn viewport_and_method_errors() {
    let (port, thread) = start(FbConfig::default());
    let fb = connect(&port);
    let unknown = fb.session().exchange().unwrap().request(5000, &[]);
    assert_eq!(unknown, Err(status(Errno::NotFound)));
    assert_eq!(fb.viewport_switch(200), Err(status(Errno::NotFound)));
    assert_eq!(fb.viewport_switch(5), Err(status(Errno::AddressUnavailable)));
    assert_eq!(fb.viewport_delete(0), Err(status(Errno::Busy)));
    assert_eq!(fb.scroll(31), Err(status(Errno::InvalidArgument)));
    fb.scroll(-30).unwrap();
    assert_eq!(fb.cursor_goto(30, 0), Err(status(Errno::InvalidArgument)));
    assert_eq!(fb.viewport_create(600, 0, 100, 16), Err(status(Errno::ResourceLimit)));
    assert_eq!(fb.viewport_create(0, 0, 0, 16), Err(status(Errno::InvalidArgument)));

    let vp = fb.viewport_create(0, 0, 64, 32).unwrap();
    fb.viewport_switch(vp).unwrap();
    assert_eq!(fb.viewport_delete(vp), Err(status(Errno::Busy)));
    fb.viewport_switch(0).unwrap();
    fb.viewport_delete(vp).unwrap();
    assert_eq!(fb.viewport_switch(vp), Err(status(Errno::AddressUnavailable)));

    fb.set_style(0xffffff, 0x000000).unwrap();
    fb.cursor_visibility(true).unwrap();
    fb.cursor_goto(1, 2).unwrap();
    fb.pointer_move(10, 10).unwrap();

    let server = stop(port, thread);
    assert!(server.pointer().enabled());
    assert_eq!(server.pointer().position(), (10, 10));
    assert_eq!(server.viewport(0).unwrap().cursor_position(), (2, 1));
    assert_eq!(server.viewport_count(), 1);
    drop(fb);
}

#[test]
fn pointer_far_off_screen_keeps_serving() {
    let (port, thread) = start(FbConfig::default());
    let fb = connect(&port);
    fb.pointer_move(usize::MAX - 2, 0).unwrap();
    fb.pointer_move(0, usize::MAX).unwrap();
    assert_eq!(fb.grid_size().unwrap(), (30, 80));

    let server = stop(port, thread);
    assert_eq!(server.pointer().position(), (0, usize::MAX));
    assert_eq!(server.screen().pixel(0, 0), Some(&BACKGROUND[..]));
    drop(fb);
}
