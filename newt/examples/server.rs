//! A minimal CoAP server: `GET coap://localhost/hello` answers
//! `Hello World!`, and `/.well-known/core` lists what's here.
//!
//! Run with `cargo run --example server`, then poke it with any CoAP
//! client.

use std::net::UdpSocket;
use std::time::Duration;

use newt::net::Socket;
use newt::server::{Attributes, Resource, Site};
use newt_msg::ContentFormat;

fn main() -> std::io::Result<()> {
  simple_logger::init_with_level(log::Level::Debug).expect("logger init");

  let sock = <UdpSocket as Socket>::bind_raw(("0.0.0.0", newt::net::DEFAULT_PORT))?;
  let mut core = newt::std::Core::new(newt::std::Clock::new(), sock);

  let mut site = Site::new();
  site.register(Resource::new("hello").attributes(Attributes { rt: Some("greeting".into()),
                                                               ct: Some(0),
                                                               ..Default::default() })
                                      .get_string("Hello World!", ContentFormat::Text));

  log::info!("serving coap on :{}", newt::net::DEFAULT_PORT);

  loop {
    match core.serve(&mut site) {
      | Ok(()) => (),
      | Err(nb::Error::WouldBlock) => std::thread::sleep(Duration::from_millis(10)),
      | Err(nb::Error::Other(e)) => log::error!("serve failed: {:?}", e),
    }
  }
}
