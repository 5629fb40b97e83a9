use crate::protocol::{Command, Frame, LINE_END, NodeReport};
use crate::{DataPacket, LaCrosse, Shared};
use core::fmt::{self, Write};

/// Records held by the node master: one slot per node address `1..=N`
/// plus the latest LaCrosse frame.
pub struct NodeTable<const N: usize> {
    nodes: [Shared<DataPacket>; N],
    lacrosse: Shared<LaCrosse>,
}

impl<const N: usize> NodeTable<N> {
    pub const fn new() -> Self {
        Self {
            nodes: [const { Shared::new() }; N],
            lacrosse: Shared::new(),
        }
    }

    fn slot(&self, address: u8) -> Option<&Shared<DataPacket>> {
        usize::from(address)
            .checked_sub(1)
            .and_then(|index| self.nodes.get(index))
    }

    /// Stores a packet under its own address, `None` for addresses without a slot.
    pub fn record(&self, packet: DataPacket) -> Option<u32> {
        self.slot(packet.address).map(|slot| slot.publish(packet))
    }

    pub fn record_lacrosse(&self, reading: LaCrosse) -> u32 {
        self.lacrosse.publish(reading)
    }

    pub fn node(&self, address: u8) -> Option<DataPacket> {
        self.slot(address)
            .and_then(Shared::latest)
            .map(|stamped| stamped.value)
    }

    pub fn lacrosse(&self) -> Option<LaCrosse> {
        self.lacrosse.latest().map(|stamped| stamped.value)
    }

    /// Writes the answer to `frame`. Missing readings answer a blank line.
    pub fn respond<W: Write>(&self, frame: Frame, now_micros: u32, out: &mut W) -> fmt::Result {
        match frame {
            Frame::Sync | Frame::Invalid(_) => out.write_str(LINE_END),
            Frame::Command(Command::Node(address)) => {
                if let Some(packet) = self.node(address) {
                    write!(out, "{}", NodeReport::from_packet(&packet, now_micros))?;
                }
                out.write_str(LINE_END)
            }
            Frame::Command(Command::LaCrosse) => {
                if let Some(reading) = self.lacrosse() {
                    write!(out, "{reading}")?;
                }
                out.write_str(LINE_END)
            }
            Frame::Command(Command::Current) => {
                for packet in self.nodes.iter().filter_map(Shared::latest) {
                    write!(
                        out,
                        "{}{LINE_END}",
                        NodeReport::from_packet(&packet.value, now_micros)
                    )?;
                }
                if let Some(reading) = self.lacrosse() {
                    write!(out, "{reading}{LINE_END}")?;
                }
                out.write_str(LINE_END)
            }
        }
    }
}

impl<const N: usize> Default for NodeTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ParseError;
    use crate::protocol::CommandReader;

    static TABLE: NodeTable<3> = NodeTable::new();

    fn answer(table: &NodeTable<3>, input: &[u8], now: u32) -> std::string::String {
        let mut reader = CommandReader::new();
        let mut out = std::string::String::new();
        for &b in input {
            if let Some(frame) = reader.push(b) {
                table.respond(frame, now, &mut out).unwrap();
            }
        }
        out
    }

    #[test]
    fn records_by_address() {
        let table: NodeTable<3> = NodeTable::new();
        assert_eq!(table.record(DataPacket::new(0, 20.0, 0, 0, 2, 0)), Some(1));
        assert_eq!(table.record(DataPacket::new(0, 20.0, 0, 0, 0, 0)), None);
        assert_eq!(table.record(DataPacket::new(0, 20.0, 0, 0, 4, 0)), None);
        assert!(table.node(1).is_none());
        assert_eq!(table.node(2).map(|p| p.address), Some(2));
    }

    #[test]
    fn answers_node_and_lacrosse_commands() {
        TABLE.record(DataPacket::new(0, 18.25, 3650, 3290, 1, 120));
        TABLE.record_lacrosse(LaCrosse::new(71, 183, 4, 20, 16, 9));

        assert_eq!(
            answer(&TABLE, b"|node1|", 4_000_000),
            "\r\n1,120,18.25,3290,3650,4\r\n"
        );
        assert_eq!(answer(&TABLE, b"node3|", 0), "\r\n");
        assert_eq!(answer(&TABLE, b"lacrosse|", 0), "9,183,71,20,4,16\r\n");
        assert_eq!(answer(&TABLE, b"what|", 0), "\r\n");
    }

    #[test]
    fn current_dumps_everything_then_blank_line() {
        let table: NodeTable<2> = NodeTable::new();
        table.record(DataPacket::new(0, 20.0, 1, 2, 1, 10));
        table.record(DataPacket::new(0, f32::NAN, 3, 4, 2, 20));
        let mut out = std::string::String::new();
        table
            .respond(Frame::Command(Command::Current), 0, &mut out)
            .unwrap();
        assert_eq!(out, "1,10,20.00,2,1,0\r\n2,20,ovf,4,3,0\r\n\r\n");
    }

    #[test]
    fn invalid_frames_get_blank_line() {
        let table: NodeTable<1> = NodeTable::new();
        let mut out = std::string::String::new();
        table
            .respond(Frame::Invalid(ParseError::TooLong), 0, &mut out)
            .unwrap();
        assert_eq!(out, "\r\n");
    }
}
