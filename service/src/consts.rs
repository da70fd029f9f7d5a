//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Telnet command bytes (RFC 854)
//!
//! Published for protocol code layered on top of the raw byte notifications.
//! Nothing in this crate interprets them.

/// Subnegotiation End
pub const SE: u8 = 240;
/// No Operation
///
/// Often sent as `IAC NOP` by peers keeping an idle connection alive, so it
/// should not count as user activity.
pub const NOP: u8 = 241;
/// Data Mark
pub const DM: u8 = 242;
/// Break
pub const BRK: u8 = 243;
/// Interrupt Process
pub const IP: u8 = 244;
/// Abort Output
pub const AO: u8 = 245;
/// Are You There
pub const AYT: u8 = 246;
/// Erase Character
pub const EC: u8 = 247;
/// Erase Line
pub const EL: u8 = 248;
/// Go Ahead
///
/// Sent after a prompt to tell the client the server is waiting for input.
pub const GA: u8 = 249;
/// Subnegotiation Begin
pub const SB: u8 = 250;
/// Will
pub const WILL: u8 = 251;
/// Won't
pub const WONT: u8 = 252;
/// Do
pub const DO: u8 = 253;
/// Don't
pub const DONT: u8 = 254;
/// Interpret As Command
///
/// The following byte is a command rather than data.
pub const IAC: u8 = 255;

/// Mnemonic for a command byte, if it is one
pub fn command_name(byte: u8) -> Option<&'static str> {
    let name = match byte {
        SE => "SE",
        NOP => "NOP",
        DM => "DM",
        BRK => "BRK",
        IP => "IP",
        AO => "AO",
        AYT => "AYT",
        EC => "EC",
        EL => "EL",
        GA => "GA",
        SB => "SB",
        WILL => "WILL",
        WONT => "WONT",
        DO => "DO",
        DONT => "DONT",
        IAC => "IAC",
        _ => return None,
    };
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_values() {
        assert_eq!(IAC, 0xFF);
        assert_eq!(SB, 250);
        assert_eq!(SE, 240);
        assert_eq!([WILL, WONT, DO, DONT], [251, 252, 253, 254]);
    }

    #[test]
    fn test_command_names() {
        assert_eq!(command_name(IAC), Some("IAC"));
        assert_eq!(command_name(GA), Some("GA"));
        assert_eq!(command_name(b'a'), None);
        assert_eq!(command_name(239), None);
        assert!((SE..=IAC).all(|b| command_name(b).is_some()));
    }
}
