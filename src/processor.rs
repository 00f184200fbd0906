//! Processor Task - API requests and timers
//!
//! [`run`] owns a [`UsbDongle`] and serves it from one Embassy task: requests
//! sent by the [`api`](crate::api) functions are handled in arrival order, and
//! whenever the dongle has a timer armed the task also waits for its deadline.
//! Everything the dongle does happens inside this one task, so the state
//! machines never see concurrent access.
//!
//! # Usage
//!
//! ```rust,ignore
//! use wrenlink::processor::{self, Clock};
//! use wrenlink::{DongleOptions, UsbDongle};
//!
//! struct EmbassyClock;
//!
//! impl Clock for EmbassyClock {
//!     fn now_ms(&self) -> u64 {
//!         embassy_time::Instant::now().as_millis()
//!     }
//!
//!     async fn wait_until(&self, deadline_ms: u64) {
//!         embassy_time::Timer::at(embassy_time::Instant::from_millis(deadline_ms)).await;
//!     }
//! }
//!
//! #[embassy_executor::task]
//! async fn dongle_task(platform: MyPlatform) -> ! {
//!     let dongle = UsbDongle::new(platform, &DongleOptions::default());
//!     processor::run(dongle, EmbassyClock).await
//! }
//! ```
//!
//! The platform reports the end of system start up by sending
//! [`DongleEvent::SystemActive`](crate::DongleEvent::SystemActive).

use embassy_futures::select::{Either, select};

use crate::dongle::{DonglePlatform, UsbDongle};
use crate::{REQUEST_CHANNEL, RESPONSE_CHANNEL, Request, Response};

/// Millisecond time source of the processor
#[allow(async_fn_in_trait)]
pub trait Clock {
    /// Milliseconds since boot
    fn now_ms(&self) -> u64;

    /// Resolve once [`now_ms`](Self::now_ms) reaches `deadline_ms`
    async fn wait_until(&self, deadline_ms: u64);
}

pub(crate) fn process_request<P: DonglePlatform>(
    dongle: &mut UsbDongle<P>,
    now_ms: u64,
    request: Request,
) -> Response {
    match request {
        Request::Event(event) => {
            dongle.handle_event(now_ms, event);
            Response::Ack
        }
        Request::PairSink(address) => match dongle.pair_sink(address) {
            Ok(()) => Response::Ack,
            Err(e) => Response::Error(e),
        },
        Request::GetState => Response::State(dongle.state()),
        Request::GetCurrentSink => Response::CurrentSink(dongle.current_sink()),
        Request::GetMode => Response::Mode(dongle.audio_mode(), dongle.transport_mode()),
    }
}

/// Initialise `dongle` and serve it forever
pub async fn run<P: DonglePlatform, C: Clock>(mut dongle: UsbDongle<P>, clock: C) -> ! {
    if let Err(e) = dongle.init() {
        error!("[PROCESSOR] dongle init failed: {:?}", e);
    }
    let receiver = REQUEST_CHANNEL.receiver();
    let sender = RESPONSE_CHANNEL.sender();

    loop {
        let request = match dongle.next_deadline() {
            Some(deadline) => match select(receiver.receive(), clock.wait_until(deadline)).await {
                Either::First(request) => Some(request),
                Either::Second(()) => None,
            },
            None => Some(receiver.receive().await),
        };

        match request {
            Some(request) => {
                debug!("[PROCESSOR] request {:?}", request);
                let response = process_request(&mut dongle, clock.now_ms(), request);
                sender.send(response).await;
            }
            None => dongle.poll_timers(clock.now_ms()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api;
    use crate::test_support::{Call, FakeDongle};
    use crate::{AudioMode, BluetoothAddress, DongleError, DongleEvent, DongleOptions, DongleState, TransportMode};
    use embassy_futures::{block_on, join::join};

    fn dongle() -> UsbDongle<FakeDongle> {
        let mut dongle = UsbDongle::new(FakeDongle::new(), &DongleOptions::default());
        dongle.init().unwrap();
        dongle
    }

    #[test]
    fn test_process_request() {
        let mut dongle = dongle();
        assert_eq!(
            process_request(&mut dongle, 0, Request::GetState),
            Response::State(DongleState::Init)
        );
        assert_eq!(
            process_request(&mut dongle, 0, Request::Event(DongleEvent::SystemActive)),
            Response::Ack
        );
        assert_eq!(
            process_request(&mut dongle, 0, Request::GetMode),
            Response::Mode(AudioMode::HighQuality, TransportMode::Dual)
        );
        // Connecting, so pairing is refused.
        let address = BluetoothAddress::from_parts(0x0002, 0x5B, 0x01_02_03);
        assert_eq!(
            process_request(&mut dongle, 0, Request::PairSink(address)),
            Response::Error(DongleError::InvalidState)
        );
        assert_eq!(
            process_request(&mut dongle, 0, Request::GetCurrentSink),
            Response::CurrentSink(None)
        );
    }

    /// Serve `count` requests the way [`run`] does
    async fn serve(dongle: &mut UsbDongle<FakeDongle>, count: usize) {
        for _ in 0..count {
            let request = REQUEST_CHANNEL.receiver().receive().await;
            let response = process_request(dongle, 0, request);
            RESPONSE_CHANNEL.sender().send(response).await;
        }
    }

    // The only test touching the static channels.
    #[test]
    fn test_api_round_trip() {
        let mut dongle = dongle();
        let client = async {
            assert_eq!(api::get_state().await, Ok(DongleState::Init));
            api::send_event(DongleEvent::SystemActive).await.unwrap();
            api::set_mode(AudioMode::Gaming, TransportMode::LeAudio).await.unwrap();
            assert_eq!(
                api::get_mode().await,
                Ok((AudioMode::Gaming, TransportMode::LeAudio))
            );
            assert_eq!(api::pair_sink("00:02:5B:01:02:03").await, Err(DongleError::InvalidState));
            api::usb_audio_connected().await.unwrap();
            assert_eq!(api::get_current_sink().await, Ok(None));
        };
        block_on(join(serve(&mut dongle, 7), client));

        assert_eq!(dongle.audio_mode(), AudioMode::Gaming);
        assert!(dongle.inputs().is_connected(crate::dongle::InputSource::UsbAudio));
        assert!(dongle.platform().called(Call::ShowAudioMode(AudioMode::Gaming)));
    }

    #[test]
    fn test_api_rejects_bad_arguments_locally() {
        // Neither call reaches the channel.
        assert_eq!(
            block_on(api::set_mode(AudioMode::Broadcast, TransportMode::Bredr)),
            Err(DongleError::InvalidParameter)
        );
        assert_eq!(block_on(api::pair_sink("00:02:5B")), Err(DongleError::InvalidParameter));
    }
}
