//! Port space built from Unix datagram socket pairs.
//!
//! A port is a connected `socketpair(AF_UNIX, SOCK_DGRAM)`: the receive
//! right owns the reading end, send rights share the writing end. Messages
//! keep their bootstrap layout byte for byte; the rights they carry travel
//! alongside as `SCM_RIGHTS` descriptors in a fixed order:
//!
//! 1. the reply right named by the header's local port, when present;
//! 2. one descriptor per port descriptor in the body, two for a moved
//!    receive right (reading end, then writing end).
//!
//! On receipt the descriptors are entered into the receiver's table under
//! fresh names and the envelope is rewritten to use them, so the broker sees
//! the same delivered form the kernel would produce.

use std::collections::HashMap;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixDatagram;
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rendezvous_wire::{Disposition, Envelope, MAX_DESCRIPTORS, PortName};
use tracing::debug;

use super::{MessageBuffer, PORTS_TARGET, PortError, PortSpace, Receipt, Right};

/// Descriptor a spawned child finds its bootstrap send right on.
pub const BOOTSTRAP_FD: RawFd = 3;

/// Environment variable announcing [`BOOTSTRAP_FD`] to children.
pub const BOOTSTRAP_FD_ENV: &str = "RENDEZVOUS_BOOTSTRAP_FD";

const FIRST_NAME: u32 = 0x203;
const NAME_STRIDE: u32 = 0x100;
const NAME_SLOTS: u32 = (u32::MAX - FIRST_NAME) / NAME_STRIDE + 1;
const MAX_RIGHTS: usize = 1 + 2 * MAX_DESCRIPTORS;
const CONTROL_WORDS: usize = 32;
const MIN_TIMEOUT: Duration = Duration::from_millis(1);

/// Port space whose ports are datagram socket pairs.
#[derive(Debug, Default)]
pub struct UnixPortSpace {
    table: Mutex<UnixTable>,
}

#[derive(Debug, Default)]
struct UnixTable {
    next_name: u32,
    ports: HashMap<PortName, UnixPort>,
}

#[derive(Debug, Default)]
struct UnixPort {
    receiver: Option<Arc<UnixDatagram>>,
    sender: Option<Arc<UnixDatagram>>,
    send_refs: u32,
    send_once_refs: u32,
}

impl UnixPort {
    const fn holds(&self, right: Right) -> bool {
        match right {
            Right::Receive => self.receiver.is_some(),
            Right::Send => self.send_refs > 0,
            Right::SendOnce => self.send_once_refs > 0,
        }
    }

    const fn is_empty(&self) -> bool {
        self.receiver.is_none() && self.send_refs == 0 && self.send_once_refs == 0
    }
}

impl UnixTable {
    /// Enters `port` under the next free name. Names wrap around after
    /// [`NAME_SLOTS`] allocations and skip names still in the table.
    fn insert(&mut self, port: UnixPort) -> PortName {
        loop {
            let slot = self.next_name % NAME_SLOTS;
            self.next_name = (slot + 1) % NAME_SLOTS;
            let name = PortName::new(FIRST_NAME + slot * NAME_STRIDE);
            if !self.ports.contains_key(&name) {
                self.ports.insert(name, port);
                return name;
            }
        }
    }

    fn holding(&self, name: PortName, right: Right) -> Result<&UnixPort, PortError> {
        self.ports
            .get(&name)
            .filter(|port| port.holds(right))
            .ok_or(PortError::InvalidRight { name, right })
    }

    /// Right a disposition consumes or derives from.
    const fn source_right(disposition: Disposition) -> Right {
        match disposition {
            Disposition::MoveReceive | Disposition::MakeSend | Disposition::MakeSendOnce => {
                Right::Receive
            }
            Disposition::MoveSend | Disposition::CopySend => Right::Send,
            Disposition::MoveSendOnce => Right::SendOnce,
        }
    }

    /// Duplicates the descriptors that carry `disposition` for `name`.
    fn carried(
        &self,
        name: PortName,
        disposition: Disposition,
        out: &mut Vec<OwnedFd>,
    ) -> Result<(), PortError> {
        let port = self.holding(name, Self::source_right(disposition))?;
        if disposition == Disposition::MoveReceive {
            let receiver = port
                .receiver
                .as_ref()
                .ok_or(PortError::InvalidRight { name, right: Right::Receive })?;
            out.push(OwnedFd::from(receiver.try_clone()?));
        }
        let sender = port.sender.as_ref().ok_or(PortError::DeadName { name })?;
        out.push(OwnedFd::from(sender.try_clone()?));
        Ok(())
    }

    /// Applies the table change of a right that left in a sent message.
    fn moved(&mut self, name: PortName, disposition: Disposition) {
        let Some(port) = self.ports.get_mut(&name) else {
            return;
        };
        match disposition {
            Disposition::MoveReceive => port.receiver = None,
            Disposition::MoveSend => port.send_refs = port.send_refs.saturating_sub(1),
            Disposition::MoveSendOnce => {
                port.send_once_refs = port.send_once_refs.saturating_sub(1);
            }
            Disposition::CopySend | Disposition::MakeSend | Disposition::MakeSendOnce => {}
        }
        if port.is_empty() {
            self.ports.remove(&name);
        }
    }

    /// Enters the rights of a received message and returns the names the
    /// delivered envelope uses.
    fn adopt(
        &mut self,
        envelope: &Envelope,
        fds: Vec<OwnedFd>,
    ) -> (PortName, Vec<PortName>) {
        let mut fds = fds.into_iter();
        let header = envelope.header;
        let reply = match header.bits.local() {
            Some(disposition) if !header.local_port.is_null() => fds
                .next()
                .map_or(PortName::NULL, |fd| self.insert(sender_port(fd, disposition))),
            _ => PortName::NULL,
        };
        let names = envelope
            .descriptors
            .iter()
            .map(|descriptor| {
                if descriptor.disposition == Disposition::MoveReceive {
                    match (fds.next(), fds.next()) {
                        (Some(receiver), Some(sender)) => self.insert(UnixPort {
                            receiver: Some(Arc::new(UnixDatagram::from(receiver))),
                            sender: Some(Arc::new(UnixDatagram::from(sender))),
                            ..UnixPort::default()
                        }),
                        _ => PortName::NULL,
                    }
                } else {
                    fds.next().map_or(PortName::NULL, |fd| {
                        self.insert(sender_port(fd, descriptor.disposition))
                    })
                }
            })
            .collect();
        (reply, names)
    }

    fn release(&mut self, name: PortName, right: Right) -> Result<(), PortError> {
        let port = self
            .ports
            .get_mut(&name)
            .filter(|port| port.holds(right))
            .ok_or(PortError::InvalidRight { name, right })?;
        match right {
            Right::Receive => port.receiver = None,
            Right::Send => port.send_refs -= 1,
            Right::SendOnce => port.send_once_refs -= 1,
        }
        if port.is_empty() {
            self.ports.remove(&name);
        }
        Ok(())
    }
}

fn sender_port(fd: OwnedFd, disposition: Disposition) -> UnixPort {
    let once = Right::arrived_as(disposition) == Right::SendOnce;
    UnixPort {
        sender: Some(Arc::new(UnixDatagram::from(fd))),
        send_refs: u32::from(!once),
        send_once_refs: u32::from(once),
        ..UnixPort::default()
    }
}

impl UnixPortSpace {
    /// Builds an empty space.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, UnixTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enters a send right received out of band, such as an inherited
    /// bootstrap descriptor.
    pub fn import_send(&self, fd: OwnedFd) -> PortName {
        self.lock().insert(UnixPort {
            sender: Some(Arc::new(UnixDatagram::from(fd))),
            send_refs: 1,
            ..UnixPort::default()
        })
    }

    /// Duplicates a descriptor carrying a send right to `name`, for handing
    /// to a child process.
    pub fn export_send(&self, name: PortName) -> Result<OwnedFd, PortError> {
        let table = self.lock();
        let port = table.ports.get(&name).ok_or(PortError::InvalidRight {
            name,
            right: Right::Send,
        })?;
        let sender = port.sender.as_ref().ok_or(PortError::DeadName { name })?;
        Ok(OwnedFd::from(sender.try_clone()?))
    }
}

impl PortSpace for UnixPortSpace {
    fn allocate(&self) -> Result<PortName, PortError> {
        let (receiver, sender) = UnixDatagram::pair().map_err(|error| PortError::Allocate {
            message: error.to_string(),
        })?;
        let name = self.lock().insert(UnixPort {
            receiver: Some(Arc::new(receiver)),
            sender: Some(Arc::new(sender)),
            send_refs: 1,
            send_once_refs: 0,
        });
        debug!(target: PORTS_TARGET, port = %name, "allocated socket pair");
        Ok(name)
    }

    fn release(&self, name: PortName, right: Right) -> Result<(), PortError> {
        self.lock().release(name, right)
    }

    fn receive(
        &self,
        port: PortName,
        buffer: &mut MessageBuffer,
        timeout: Option<Duration>,
    ) -> Result<Receipt, PortError> {
        let receiver = {
            let table = self.lock();
            let entry = table.holding(port, Right::Receive)?;
            entry
                .receiver
                .clone()
                .ok_or(PortError::InvalidRight { name: port, right: Right::Receive })?
        };
        receiver.set_read_timeout(timeout.map(|wait| wait.max(MIN_TIMEOUT)))?;

        let (len, fds, truncated) = match receive_with_rights(&receiver, buffer.as_mut_slice()) {
            Ok(received) => received,
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                return Ok(Receipt::TimedOut);
            }
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {
                return Ok(Receipt::Interrupted);
            }
            Err(error) => return Err(error.into()),
        };

        if truncated {
            drop(fds);
            return Ok(Receipt::Dropped);
        }

        // Rights of a message whose envelope cannot be read are closed here;
        // the bytes still go up so the loop can log the failure.
        let Ok(envelope) = Envelope::read(buffer.message(len)) else {
            drop(fds);
            return Ok(Receipt::Message(len));
        };
        let (reply, names) = self.lock().adopt(&envelope, fds);
        let delivered = envelope.delivered(port, reply, &names);
        delivered.write_into(buffer.as_mut_slice())?;
        Ok(Receipt::Message(len))
    }

    fn send(&self, message: &[u8]) -> Result<(), PortError> {
        let envelope = Envelope::read(message)?;
        let header = envelope.header;
        let destination = header.remote_port;
        let destination_disposition = header.bits.remote().ok_or(PortError::InvalidRight {
            name: destination,
            right: Right::Send,
        })?;
        let reply = header
            .bits
            .local()
            .filter(|_| !header.local_port.is_null());

        let (socket, fds) = {
            let table = self.lock();
            let entry = table.holding(destination, UnixTable::source_right(destination_disposition))?;
            let socket = entry
                .sender
                .clone()
                .ok_or(PortError::DeadName { name: destination })?;
            let mut fds = Vec::with_capacity(MAX_RIGHTS);
            if let Some(disposition) = reply {
                table.carried(header.local_port, disposition, &mut fds)?;
            }
            for descriptor in &envelope.descriptors {
                table.carried(descriptor.name, descriptor.disposition, &mut fds)?;
            }
            (socket, fds)
        };

        let bytes = message.get(..header.declared_len()).unwrap_or(message);
        send_with_rights(&socket, bytes, &fds).map_err(|error| {
            if error.kind() == io::ErrorKind::ConnectionRefused {
                PortError::DeadName { name: destination }
            } else {
                PortError::from(error)
            }
        })?;

        let mut table = self.lock();
        table.moved(destination, destination_disposition);
        if let Some(disposition) = reply {
            table.moved(header.local_port, disposition);
        }
        for descriptor in &envelope.descriptors {
            table.moved(descriptor.name, descriptor.disposition);
        }
        Ok(())
    }

    fn discard(&self, message: &[u8]) {
        let Ok(envelope) = Envelope::read(message) else {
            return;
        };
        let mut table = self.lock();
        let header = envelope.header;
        if let Some(disposition) = header.bits.remote().filter(|_| !header.remote_port.is_null())
        {
            release_discarded(&mut table, header.remote_port, Right::arrived_as(disposition));
        }
        for descriptor in &envelope.descriptors {
            if !descriptor.name.is_null() {
                release_discarded(
                    &mut table,
                    descriptor.name,
                    Right::arrived_as(descriptor.disposition),
                );
            }
        }
    }
}

fn release_discarded(table: &mut UnixTable, name: PortName, right: Right) {
    if let Err(error) = table.release(name, right) {
        debug!(
            target: PORTS_TARGET,
            port = %name,
            %right,
            %error,
            "discarded right already gone"
        );
    }
}

/// Sends one datagram with `fds` attached as `SCM_RIGHTS`.
fn send_with_rights(socket: &UnixDatagram, bytes: &[u8], fds: &[OwnedFd]) -> io::Result<()> {
    let raw: Vec<RawFd> = fds.iter().map(AsRawFd::as_raw_fd).collect();
    let payload = raw.len() * mem::size_of::<RawFd>();
    let mut control = [0_u64; CONTROL_WORDS];
    let mut iov = libc::iovec {
        iov_base: bytes.as_ptr().cast_mut().cast(),
        iov_len: bytes.len(),
    };
    // SAFETY: an all-zero `msghdr` is a valid empty header.
    let mut header: libc::msghdr = unsafe { mem::zeroed() };
    header.msg_iov = &mut iov;
    header.msg_iovlen = 1;
    if !raw.is_empty() {
        let payload_len = u32::try_from(payload).map_err(io::Error::other)?;
        // SAFETY: `control` is larger than `CMSG_SPACE` of at most
        // `MAX_RIGHTS` descriptors and suitably aligned for `cmsghdr`.
        unsafe {
            let space = libc::CMSG_SPACE(payload_len) as usize;
            if space > mem::size_of_val(&control) {
                return Err(io::Error::other("too many rights for one message"));
            }
            header.msg_control = control.as_mut_ptr().cast();
            header.msg_controllen = space as _;
            let cmsg = libc::CMSG_FIRSTHDR(&header);
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            (*cmsg).cmsg_len = libc::CMSG_LEN(payload_len) as _;
            ptr::copy_nonoverlapping(raw.as_ptr().cast::<u8>(), libc::CMSG_DATA(cmsg), payload);
        }
    }
    // SAFETY: `header` points at live buffers for the duration of the call.
    let sent = unsafe { libc::sendmsg(socket.as_raw_fd(), &header, 0) };
    if sent < 0 {
        return Err(io::Error::last_os_error());
    }
    if usize::try_from(sent).ok() != Some(bytes.len()) {
        return Err(io::Error::new(io::ErrorKind::WriteZero, "short datagram send"));
    }
    Ok(())
}

/// Receives one datagram and the descriptors attached to it, and whether
/// either was cut short.
fn receive_with_rights(
    socket: &UnixDatagram,
    buffer: &mut [u8],
) -> io::Result<(usize, Vec<OwnedFd>, bool)> {
    let mut control = [0_u64; CONTROL_WORDS];
    let mut iov = libc::iovec {
        iov_base: buffer.as_mut_ptr().cast(),
        iov_len: buffer.len(),
    };
    // SAFETY: an all-zero `msghdr` is a valid empty header.
    let mut header: libc::msghdr = unsafe { mem::zeroed() };
    header.msg_iov = &mut iov;
    header.msg_iovlen = 1;
    header.msg_control = control.as_mut_ptr().cast();
    header.msg_controllen = mem::size_of_val(&control) as _;

    // SAFETY: `header` points at live buffers for the duration of the call.
    let received = unsafe { libc::recvmsg(socket.as_raw_fd(), &mut header, RECV_FLAGS) };
    if received < 0 {
        return Err(io::Error::last_os_error());
    }

    let mut fds = Vec::new();
    // SAFETY: the kernel filled `control` with well-formed control messages
    // and `msg_controllen` bounds them.
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&header);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                let data = libc::CMSG_DATA(cmsg).cast::<RawFd>();
                let payload = ((*cmsg).cmsg_len as usize).saturating_sub(libc::CMSG_LEN(0) as usize);
                for index in 0..payload / mem::size_of::<RawFd>() {
                    let fd = ptr::read_unaligned(data.add(index));
                    fds.push(OwnedFd::from_raw_fd(fd));
                }
            }
            cmsg = libc::CMSG_NXTHDR(&header, cmsg);
        }
    }
    for fd in &fds {
        set_cloexec(fd)?;
    }
    let truncated = header.msg_flags & (libc::MSG_CTRUNC | libc::MSG_TRUNC) != 0;
    let len = usize::try_from(received).map_err(io::Error::other)?;
    Ok((len, fds, truncated))
}

#[cfg(any(target_os = "linux", target_os = "android"))]
const RECV_FLAGS: libc::c_int = libc::MSG_CMSG_CLOEXEC;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const RECV_FLAGS: libc::c_int = 0;

fn set_cloexec(fd: &OwnedFd) -> io::Result<()> {
    // SAFETY: `fd` is a descriptor this process owns.
    let result = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) };
    if result < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rendezvous_wire::{
        NameLayout, PortDescriptor, ReplyBody, Request, RequestBody, ServiceName, Status,
        decode_reply, decode_request, encode_reply, encode_request, Reply,
    };

    use super::*;

    const WAIT: Option<Duration> = Some(Duration::from_secs(2));

    fn receive(space: &UnixPortSpace, port: PortName) -> Vec<u8> {
        let mut buffer = MessageBuffer::new();
        match space.receive(port, &mut buffer, WAIT).expect("receive") {
            Receipt::Message(len) => buffer.message(len).to_vec(),
            other => panic!("expected a message, got {other:?}"),
        }
    }

    /// A client space holding a send right to `broker_port` in `broker`.
    fn client_of(broker: &UnixPortSpace, broker_port: PortName) -> (UnixPortSpace, PortName) {
        let client = UnixPortSpace::new();
        let fd = broker.export_send(broker_port).expect("export");
        let name = client.import_send(fd);
        (client, name)
    }

    #[test]
    fn requests_and_replies_cross_spaces() {
        let broker = UnixPortSpace::new();
        let broker_port = broker.allocate().expect("allocate broker port");
        let (client, destination) = client_of(&broker, broker_port);
        let reply_port = client.allocate().expect("allocate reply port");

        let name = ServiceName::new("svcA", NameLayout::Fixed).expect("name");
        let request = Request::new(RequestBody::LookUp { name }, destination, reply_port);
        client.send(&encode_request(&request)).expect("client send");

        let received = decode_request(&receive(&broker, broker_port)).expect("decode request");
        assert_eq!(received.header.local_port, broker_port);
        let (reply_right, disposition) = received.reply_port().expect("reply right");
        assert_eq!(disposition, Disposition::MoveSendOnce);

        let reply = Reply::to(&received, ReplyBody::Status(Status::UnknownService))
            .expect("reply addressable");
        broker.send(&encode_reply(&reply)).expect("broker reply");
        assert!(
            broker.release(reply_right, Right::SendOnce).is_err(),
            "the send-once right is consumed by the reply"
        );

        let answer = decode_reply(&receive(&client, reply_port)).expect("decode reply");
        assert_eq!(answer.body, ReplyBody::Status(Status::UnknownService));
    }

    #[test]
    fn carried_send_rights_reach_the_service_port() {
        let broker = UnixPortSpace::new();
        let broker_port = broker.allocate().expect("allocate broker port");
        let (client, destination) = client_of(&broker, broker_port);
        let service = client.allocate().expect("allocate service port");

        let name = ServiceName::new("svcA", NameLayout::LengthPrefixed).expect("name");
        let port = PortDescriptor::new(service, Disposition::MakeSend);
        let request = Request::new(RequestBody::RegisterPort { name, port }, destination, PortName::NULL);
        client.send(&encode_request(&request)).expect("client send");

        let received = decode_request(&receive(&broker, broker_port)).expect("decode");
        let carried = received.body.port().expect("descriptor").name;
        assert!(!carried.is_null());

        let wake = super::super::wake_message(carried);
        broker.send(&wake).expect("send through the carried right");
        let woke = receive(&client, service);
        assert_eq!(Envelope::read(&woke).expect("envelope").header.id, 799);
    }

    #[test]
    fn empty_ports_time_out() {
        let space = UnixPortSpace::new();
        let port = space.allocate().expect("allocate");
        let mut buffer = MessageBuffer::new();
        let receipt = space
            .receive(port, &mut buffer, Some(Duration::from_millis(10)))
            .expect("receive");
        assert_eq!(receipt, Receipt::TimedOut);
    }

    #[test]
    fn released_rights_cannot_be_released_again() {
        let space = UnixPortSpace::new();
        let port = space.allocate().expect("allocate");
        space.release(port, Right::Send).expect("first release");
        assert!(space.release(port, Right::Send).is_err());
        space.release(port, Right::Receive).expect("receive release");
        assert!(space.export_send(port).is_err(), "port left the table");
    }

    #[test]
    fn names_wrap_without_reusing_live_ports() {
        let mut table = UnixTable {
            next_name: NAME_SLOTS - 1,
            ..UnixTable::default()
        };
        let first = PortName::new(FIRST_NAME);
        table.ports.insert(first, UnixPort::default());

        let last = table.insert(UnixPort::default());
        assert_eq!(last, PortName::new(FIRST_NAME + (NAME_SLOTS - 1) * NAME_STRIDE));

        let wrapped = table.insert(UnixPort::default());
        assert_ne!(wrapped, first, "a live name must not be handed out again");
        assert_eq!(wrapped, PortName::new(FIRST_NAME + NAME_STRIDE));
        assert_eq!(table.ports.len(), 3);
    }

    #[test]
    fn discarding_unheld_rights_leaves_the_table_intact() {
        let broker = UnixPortSpace::new();
        let broker_port = broker.allocate().expect("allocate broker port");
        let stranger = PortName::new(FIRST_NAME + 40 * NAME_STRIDE);
        let name = ServiceName::new("svcA", NameLayout::Fixed).expect("name");
        let request = Request::new(
            RequestBody::Register {
                name,
                port: PortDescriptor::new(stranger, Disposition::MoveSend),
            },
            stranger,
            PortName::NULL,
        );

        broker.discard(&encode_request(&request));

        broker
            .release(broker_port, Right::Send)
            .expect("the broker's own right survives the discard");
    }
}
