//! Routing tests for bootstrap dispatch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rendezvous_config::{CheckInPolicy, DenyList, LookupPolicy};
use rendezvous_wire::{
    NameLayout, PortName, ServiceName, decode_request, encode_request,
};
use rstest::{fixture, rstest};

use super::*;
use crate::ports::loopback::LoopbackPortSpace;
use crate::ports::{MessageBuffer, Receipt};

struct Harness {
    space: Arc<LoopbackPortSpace>,
    broker_port: PortName,
    registry: Registry,
    dispatcher: Dispatcher,
}

impl Harness {
    fn new(policy: LookupPolicy) -> Self {
        let space = Arc::new(LoopbackPortSpace::new());
        let shared: Arc<dyn PortSpace> = Arc::clone(&space) as Arc<dyn PortSpace>;
        let broker_port = space.allocate().expect("broker port");
        Self {
            registry: Registry::new(Arc::clone(&shared), 8, CheckInPolicy::Reject),
            dispatcher: Dispatcher::new(
                shared,
                DenyList::new(["com.apple.oahd"]),
                policy,
                Duration::from_millis(500),
            ),
            space,
            broker_port,
        }
    }

    /// Sends `body` from a fresh client reply port and returns the request
    /// as the broker receives it.
    fn deliver(&self, body: RequestBody) -> Request {
        let reply_port = self.space.allocate().expect("reply port");
        let request = Request::new(body, self.broker_port, reply_port);
        self.space.send(&encode_request(&request)).expect("send request");
        let mut buffer = MessageBuffer::new();
        let receipt = self
            .space
            .receive(self.broker_port, &mut buffer, Some(Duration::from_secs(1)))
            .expect("receive request");
        let Receipt::Message(len) = receipt else {
            panic!("expected a request, got {receipt:?}");
        };
        decode_request(buffer.message(len)).expect("decode request")
    }

    fn dispatch(&mut self, body: RequestBody) -> Action {
        let request = self.deliver(body);
        self.dispatcher
            .dispatch(&mut self.registry, request, Instant::now())
    }
}

#[fixture]
fn harness() -> Harness {
    Harness::new(LookupPolicy::Immediate)
}

fn service(name: &str) -> ServiceName {
    ServiceName::new(name, NameLayout::Fixed).expect("service name")
}

fn status_of(action: &Action) -> Option<Status> {
    match action {
        Action::Reply {
            reply:
                Reply {
                    body: ReplyBody::Status(status),
                    ..
                },
            ..
        } => Some(*status),
        _ => None,
    }
}

fn port_of(action: &Action) -> Option<PortDescriptor> {
    match action {
        Action::Reply {
            reply:
                Reply {
                    body: ReplyBody::Port(descriptor),
                    ..
                },
            ..
        } => Some(*descriptor),
        _ => None,
    }
}

#[rstest]
fn check_in_moves_a_fresh_receive_right(mut harness: Harness) {
    let action = harness.dispatch(RequestBody::CheckIn {
        name: service("svcA"),
    });

    let descriptor = port_of(&action).expect("port reply");
    assert_eq!(descriptor.disposition, Disposition::MoveReceive);
    let Action::Reply { reply, moved, .. } = action else {
        panic!("expected a reply");
    };
    assert_eq!(reply.id, 502);
    assert_eq!(reply.disposition, Disposition::MoveSendOnce);
    let moved = moved.expect("the receive right travels with the reply");
    assert_eq!(moved.name(), descriptor.name);
    assert_eq!(moved.right(), Right::Receive);
    moved.transfer();
    assert!(harness.registry.contains("svcA"));
}

#[rstest]
fn repeated_check_in_answers_name_in_use(mut harness: Harness) {
    if let Action::Reply {
        moved: Some(moved), ..
    } = harness.dispatch(RequestBody::CheckIn {
        name: service("svcA"),
    }) {
        moved.transfer();
    }

    let action = harness.dispatch(RequestBody::CheckIn {
        name: service("svcA"),
    });
    assert_eq!(status_of(&action), Some(Status::NameInUse));
}

#[rstest]
fn look_up_after_register_copies_the_registered_right(mut harness: Harness) {
    let service_port = harness.space.allocate().expect("service port");
    let action = harness.dispatch(RequestBody::RegisterPort {
        name: ServiceName::new("svcA", NameLayout::LengthPrefixed).expect("name"),
        port: PortDescriptor::new(service_port, Disposition::MakeSend),
    });
    assert_eq!(status_of(&action), Some(Status::Success));

    let action = harness.dispatch(RequestBody::LookUp {
        name: service("svcA"),
    });
    let descriptor = port_of(&action).expect("port reply");
    assert_eq!(descriptor.name, service_port);
    assert_eq!(descriptor.disposition, Disposition::CopySend);
}

#[rstest]
fn unknown_services_are_answered_immediately(mut harness: Harness) {
    let action = harness.dispatch(RequestBody::LookupPort {
        name: ServiceName::new("svcB", NameLayout::LengthPrefixed).expect("name"),
    });
    assert_eq!(status_of(&action), Some(Status::UnknownService));
}

#[rstest]
#[case(RequestBody::Parent, Status::InvalidRight)]
#[case(RequestBody::Subset, Status::InvalidRight)]
#[case(RequestBody::SpawnApp, Status::NotSupported)]
fn unsupported_requests_answer_fixed_statuses(
    mut harness: Harness,
    #[case] body: RequestBody,
    #[case] expected: Status,
) {
    let action = harness.dispatch(body);
    assert_eq!(status_of(&action), Some(expected));
    assert!(matches!(
        action,
        Action::Reply {
            release_carried: true,
            ..
        }
    ));
}

#[rstest]
fn answered_requests_keep_their_carried_rights(mut harness: Harness) {
    let action = harness.dispatch(RequestBody::LookUp {
        name: service("svcA"),
    });
    assert!(matches!(
        action,
        Action::Reply {
            release_carried: false,
            ..
        }
    ));
}

#[rstest]
#[case(RequestBody::Unknown { id: 900 })]
#[case(RequestBody::Wake)]
fn unknown_and_wake_messages_are_discarded(mut harness: Harness, #[case] body: RequestBody) {
    let action = harness.dispatch(body);
    assert!(matches!(action, Action::Discard));
}

#[test]
fn wait_policy_parks_and_later_resolves() {
    let mut harness = Harness::new(LookupPolicy::Wait);
    let action = harness.dispatch(RequestBody::LookUp {
        name: service("svcA"),
    });
    let Action::Park(parked) = action else {
        panic!("expected the look-up to be parked");
    };
    assert_eq!(parked.name(), "svcA");

    let resolved = harness.dispatcher.resolve(&harness.registry, &parked);
    assert_eq!(status_of(&resolved), Some(Status::UnknownService));

    let service_port = harness.space.allocate().expect("service port");
    let registered = harness.dispatch(RequestBody::Register {
        name: service("svcA"),
        port: PortDescriptor::new(service_port, Disposition::MakeSend),
    });
    assert_eq!(status_of(&registered), Some(Status::Success));

    let resolved = harness.dispatcher.resolve(&harness.registry, &parked);
    assert_eq!(port_of(&resolved).map(|port| port.name), Some(service_port));
}

#[test]
fn denied_services_are_never_parked() {
    let mut harness = Harness::new(LookupPolicy::Wait);
    let action = harness.dispatch(RequestBody::LookUp {
        name: service("com.apple.oahd.helper"),
    });
    assert_eq!(status_of(&action), Some(Status::UnknownService));
}

#[test]
fn expired_look_ups_answer_unknown_service() {
    let mut harness = Harness::new(LookupPolicy::Wait);
    let Action::Park(parked) = harness.dispatch(RequestBody::LookUp {
        name: service("svcA"),
    }) else {
        panic!("expected the look-up to be parked");
    };
    let action = Dispatcher::expire(&parked);
    assert_eq!(status_of(&action), Some(Status::UnknownService));
}
