//! Time syscalls.

use super::base::status_return;
use super::{read_user, write_user};
use crate::arch::i386::rtc::DateTime;

/// Wall-clock argument block, BCD-free.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct LocalTimeArgs {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub reserved: u8,
}

pub fn sys_get_system_time(_parameter: u32) -> u32 {
    crate::timer::system_time() as u32
}

pub fn sys_set_system_time(parameter: u32) -> u32 {
    crate::timer::set_system_time(u64::from(parameter));
    0
}

pub fn sys_get_local_time(parameter: u32) -> u32 {
    let now = crate::timer::local_time();
    let out = LocalTimeArgs {
        year: now.year,
        month: now.month,
        day: now.day,
        hours: now.hours,
        minutes: now.minutes,
        seconds: now.seconds,
        reserved: 0,
    };
    status_return(write_user(parameter, &out))
}

pub fn sys_set_local_time(parameter: u32) -> u32 {
    status_return(read_user::<LocalTimeArgs>(parameter).map(|args| {
        crate::timer::set_local_time(&DateTime {
            year: args.year,
            month: args.month,
            day: args.day,
            hours: args.hours,
            minutes: args.minutes,
            seconds: args.seconds,
        });
    }))
}
