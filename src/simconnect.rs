//! [`SimulatorLink`] over the SimConnect client library.
//!
//! `SimConnect.dll` is loaded at runtime with `libloading`, so the crate builds
//! anywhere; opening a session fails with [`LinkError::LibraryLoad`] where the
//! library is not installed.

use std::ffi::{c_char, c_void, CStr, CString};
use std::sync::Arc;

use crossbeam_channel::Sender;
use libloading::Library;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::definitions::{
    ActionEvent, DataCategory, FieldDef, HudDefinition, WritableVariable, REQUIRED_FIELDS,
};
use crate::error::LinkError;
use crate::link::{LinkEvent, SimulatorLink, SystemEvent};
use crate::telemetry::SimDataItem;

// -----------------------------
// SimConnect minimal FFI
// -----------------------------
type DWord = u32;
type HRESULT = i32;
type Handle = *mut c_void;
type HWnd = *mut c_void;

#[repr(C)]
struct SimRecv {
    dw_size: DWord,
    dw_version: DWord,
    dw_id: DWord,
}

#[repr(C)]
struct SimRecvException {
    base: SimRecv,
    dw_exception: DWord,
    dw_send_id: DWord,
    dw_index: DWord,
}

#[repr(C)]
struct SimRecvEvent {
    base: SimRecv,
    u_group_id: DWord,
    u_event_id: DWord,
    dw_data: DWord,
}

#[repr(C)]
struct SimRecvEventFilename {
    event: SimRecvEvent,
    sz_file_name: [c_char; 260],
    dw_flags: DWord,
}

#[repr(C)]
struct SimRecvSimObjectData {
    base: SimRecv,
    dw_request_id: DWord,
    dw_object_id: DWord,
    dw_define_id: DWord,
    dw_flags: DWord,
    dw_entrynumber: DWord,
    dw_outof: DWord,
    dw_define_count: DWord,
    dw_data: DWord, // payload starts here
}

const SIMCONNECT_RECV_ID_EXCEPTION: DWord = 1;
const SIMCONNECT_RECV_ID_OPEN: DWord = 2;
const SIMCONNECT_RECV_ID_QUIT: DWord = 3;
const SIMCONNECT_RECV_ID_EVENT: DWord = 4;
const SIMCONNECT_RECV_ID_EVENT_FILENAME: DWord = 6;
const SIMCONNECT_RECV_ID_SIMOBJECT_DATA: DWord = 8;

const SIMCONNECT_PERIOD_ONCE: DWord = 1;
const SIMCONNECT_DATATYPE_FLOAT64: DWord = 4;
const SIMCONNECT_UNUSED: DWord = 0xFFFF_FFFF;
const SIMCONNECT_GROUP_PRIORITY_HIGHEST: DWord = 1;
const SIMCONNECT_EVENT_FLAG_GROUPID_IS_PRIORITY: DWord = 0x10;

const USER_OBJECT_ID: DWord = 0;

const EVT_SIM_START: DWord = 1001;
const EVT_SIM_STOP: DWord = 1002;
const EVT_PAUSE: DWord = 1003;
const EVT_AIRCRAFT_LOADED: DWord = 1004;
const EVT_ACTION_BASE: DWord = 1100;

const DEF_REQUIRED: DWord = 2001;
const DEF_HUD: DWord = 2002;
const DEF_WRITE_BASE: DWord = 2100;
const REQ_REQUIRED: DWord = 3001;
const REQ_HUD: DWord = 3002;

const SYSTEM_EVENTS: [(DWord, &str); 4] = [
    (EVT_SIM_START, "SimStart"),
    (EVT_SIM_STOP, "SimStop"),
    (EVT_PAUSE, "Pause"),
    (EVT_AIRCRAFT_LOADED, "AircraftLoaded"),
];

type PfnSimConnectOpen =
    unsafe extern "system" fn(*mut Handle, *const c_char, HWnd, DWord, Handle, DWord) -> HRESULT;
type PfnSimConnectClose = unsafe extern "system" fn(Handle) -> HRESULT;
type PfnSimConnectAddToDataDefinition = unsafe extern "system" fn(
    Handle,
    DWord,
    *const c_char,
    *const c_char,
    DWord,
    f32,
    DWord,
) -> HRESULT;
type PfnSimConnectClearDataDefinition = unsafe extern "system" fn(Handle, DWord) -> HRESULT;
type PfnSimConnectRequestDataOnSimObject = unsafe extern "system" fn(
    Handle,
    DWord,
    DWord,
    DWord,
    DWord,
    DWord,
    DWord,
    DWord,
    DWord,
) -> HRESULT;
type PfnSimConnectGetNextDispatch =
    unsafe extern "system" fn(Handle, *mut *mut SimRecv, *mut DWord) -> HRESULT;
type PfnSimConnectSubscribeToSystemEvent =
    unsafe extern "system" fn(Handle, DWord, *const c_char) -> HRESULT;
type PfnSimConnectMapClientEventToSimEvent =
    unsafe extern "system" fn(Handle, DWord, *const c_char) -> HRESULT;
type PfnSimConnectTransmitClientEvent =
    unsafe extern "system" fn(Handle, DWord, DWord, DWord, DWord, DWord) -> HRESULT;
type PfnSimConnectSetDataOnSimObject =
    unsafe extern "system" fn(Handle, DWord, DWord, DWord, DWord, DWord, *mut c_void) -> HRESULT;

#[inline]
fn hr_hex(hr: HRESULT) -> String {
    format!("0x{:08X}", hr as u32)
}

fn check(call: &'static str, hr: HRESULT) -> Result<(), LinkError> {
    if hr < 0 {
        Err(LinkError::Call {
            call,
            hresult: hr_hex(hr),
        })
    } else {
        Ok(())
    }
}

fn c_string(s: &str) -> Result<CString, LinkError> {
    CString::new(s).map_err(|_| LinkError::InvalidName(s.to_string()))
}

#[derive(Clone)]
struct SimConnectFns {
    _lib: Arc<Library>,
    open: PfnSimConnectOpen,
    close: PfnSimConnectClose,
    add_to_def: PfnSimConnectAddToDataDefinition,
    clear_def: PfnSimConnectClearDataDefinition,
    req_data: PfnSimConnectRequestDataOnSimObject,
    next_dispatch: PfnSimConnectGetNextDispatch,
    subscribe_event: Option<PfnSimConnectSubscribeToSystemEvent>,
    map_event: PfnSimConnectMapClientEventToSimEvent,
    transmit_event: PfnSimConnectTransmitClientEvent,
    set_data: PfnSimConnectSetDataOnSimObject,
}

fn load_simconnect(paths: &[String]) -> Result<SimConnectFns, LinkError> {
    let mut last_err = String::from("no library path configured");
    let mut lib = None;
    for p in paths {
        match unsafe { Library::new(p) } {
            Ok(l) => {
                lib = Some(l);
                break;
            }
            Err(e) => last_err = format!("{p}: {e}"),
        }
    }
    let lib = lib.ok_or(LinkError::LibraryLoad(last_err))?;

    unsafe {
        let open: PfnSimConnectOpen = *lib
            .get(b"SimConnect_Open\0")
            .map_err(|_| LinkError::MissingSymbol("SimConnect_Open"))?;
        let close: PfnSimConnectClose = *lib
            .get(b"SimConnect_Close\0")
            .map_err(|_| LinkError::MissingSymbol("SimConnect_Close"))?;
        let add_to_def: PfnSimConnectAddToDataDefinition = *lib
            .get(b"SimConnect_AddToDataDefinition\0")
            .map_err(|_| LinkError::MissingSymbol("SimConnect_AddToDataDefinition"))?;
        let clear_def: PfnSimConnectClearDataDefinition = *lib
            .get(b"SimConnect_ClearDataDefinition\0")
            .map_err(|_| LinkError::MissingSymbol("SimConnect_ClearDataDefinition"))?;
        let req_data: PfnSimConnectRequestDataOnSimObject = *lib
            .get(b"SimConnect_RequestDataOnSimObject\0")
            .map_err(|_| LinkError::MissingSymbol("SimConnect_RequestDataOnSimObject"))?;
        let next_dispatch: PfnSimConnectGetNextDispatch = *lib
            .get(b"SimConnect_GetNextDispatch\0")
            .map_err(|_| LinkError::MissingSymbol("SimConnect_GetNextDispatch"))?;
        let subscribe_event: Option<PfnSimConnectSubscribeToSystemEvent> = lib
            .get::<PfnSimConnectSubscribeToSystemEvent>(b"SimConnect_SubscribeToSystemEvent\0")
            .ok()
            .map(|s| *s);
        let map_event: PfnSimConnectMapClientEventToSimEvent = *lib
            .get(b"SimConnect_MapClientEventToSimEvent\0")
            .map_err(|_| LinkError::MissingSymbol("SimConnect_MapClientEventToSimEvent"))?;
        let transmit_event: PfnSimConnectTransmitClientEvent = *lib
            .get(b"SimConnect_TransmitClientEvent\0")
            .map_err(|_| LinkError::MissingSymbol("SimConnect_TransmitClientEvent"))?;
        let set_data: PfnSimConnectSetDataOnSimObject = *lib
            .get(b"SimConnect_SetDataOnSimObject\0")
            .map_err(|_| LinkError::MissingSymbol("SimConnect_SetDataOnSimObject"))?;

        Ok(SimConnectFns {
            _lib: Arc::new(lib),
            open,
            close,
            add_to_def,
            clear_def,
            req_data,
            next_dispatch,
            subscribe_event,
            map_event,
            transmit_event,
            set_data,
        })
    }
}

// -----------------------------
// Session
// -----------------------------
struct Session {
    handle: Handle,
    events: Sender<LinkEvent>,
    hud: HudDefinition,
}

// The handle is only used while holding the session mutex.
unsafe impl Send for Session {}

pub struct SimConnectLink {
    app_name: String,
    library_paths: Vec<String>,
    fns: Mutex<Option<SimConnectFns>>,
    session: Mutex<Option<Session>>,
}

impl SimConnectLink {
    pub fn new(app_name: impl Into<String>, library_paths: Vec<String>) -> Self {
        Self {
            app_name: app_name.into(),
            library_paths,
            fns: Mutex::new(None),
            session: Mutex::new(None),
        }
    }

    fn fns(&self) -> Result<SimConnectFns, LinkError> {
        let mut g = self.fns.lock();
        if let Some(f) = g.as_ref() {
            return Ok(f.clone());
        }
        let f = load_simconnect(&self.library_paths)?;
        info!("SimConnect library loaded");
        *g = Some(f.clone());
        Ok(f)
    }

    fn with_session<T>(
        &self,
        f: impl FnOnce(&SimConnectFns, &mut Session) -> Result<T, LinkError>,
    ) -> Result<T, LinkError> {
        let fns = self.fns()?;
        let mut g = self.session.lock();
        let s = g.as_mut().ok_or(LinkError::NotConnected)?;
        f(&fns, s)
    }
}

fn add_fields(fns: &SimConnectFns, h: Handle, def_id: DWord, fields: &[FieldDef]) {
    for (name, unit) in fields {
        let r = c_string(name).and_then(|n| {
            let u = c_string(unit)?;
            let hr = unsafe {
                (fns.add_to_def)(
                    h,
                    def_id,
                    n.as_ptr(),
                    u.as_ptr(),
                    SIMCONNECT_DATATYPE_FLOAT64,
                    0.0,
                    SIMCONNECT_UNUSED,
                )
            };
            check("SimConnect_AddToDataDefinition", hr)
        });
        if let Err(e) = r {
            warn!(field = *name, unit = *unit, error = %e, "SimConnect: AddToDef failed");
        }
    }
}

fn action_event_id(action: ActionEvent) -> DWord {
    let idx = ActionEvent::ALL.iter().position(|a| *a == action).unwrap_or(0);
    EVT_ACTION_BASE + idx as DWord
}

fn write_def_id(variable: WritableVariable) -> DWord {
    let idx = WritableVariable::ALL
        .iter()
        .position(|v| *v == variable)
        .unwrap_or(0);
    DEF_WRITE_BASE + idx as DWord
}

/// Copies `count` FLOAT64 values following the data header.
///
/// # Safety
/// `p_recv` must point to a SIMOBJECT_DATA message of `cb` bytes.
unsafe fn read_payload(
    p_recv: *const SimRecv,
    cb: DWord,
    fields: &[FieldDef],
) -> Option<Vec<SimDataItem>> {
    let sod = &*(p_recv as *const SimRecvSimObjectData);
    let base_ptr = p_recv as *const u8;
    let data_ptr = (&sod.dw_data as *const DWord) as *const u8;
    let header_bytes = (data_ptr as usize).saturating_sub(base_ptr as usize);
    let payload_len = (cb as usize).saturating_sub(header_bytes);

    let count = (sod.dw_define_count as usize).min(fields.len());
    if count == 0 || payload_len < count * 8 {
        return None;
    }

    let items = fields[..count]
        .iter()
        .enumerate()
        .map(|(i, (name, _))| {
            let x = std::ptr::read_unaligned((data_ptr as *const f64).add(i));
            SimDataItem::new(*name, x)
        })
        .collect();
    Some(items)
}

/// Maps one dispatched message to a link event, if it carries one.
///
/// # Safety
/// `p_recv` must be a message of `cb` bytes returned by GetNextDispatch.
unsafe fn translate(p_recv: *const SimRecv, cb: DWord, session: &Session) -> Option<LinkEvent> {
    match (*p_recv).dw_id {
        SIMCONNECT_RECV_ID_OPEN => None,
        SIMCONNECT_RECV_ID_QUIT => Some(LinkEvent::Disconnected),
        SIMCONNECT_RECV_ID_EXCEPTION => {
            let ex = &*(p_recv as *const SimRecvException);
            Some(LinkEvent::Error(format!(
                "SimConnect exception {} (send id {}, index {})",
                ex.dw_exception, ex.dw_send_id, ex.dw_index
            )))
        }
        SIMCONNECT_RECV_ID_EVENT_FILENAME => {
            let ev = &*(p_recv as *const SimRecvEventFilename);
            if ev.event.u_event_id != EVT_AIRCRAFT_LOADED {
                return None;
            }
            let path = CStr::from_ptr(ev.sz_file_name.as_ptr())
                .to_string_lossy()
                .into_owned();
            Some(LinkEvent::ActiveAircraftChanged(path))
        }
        SIMCONNECT_RECV_ID_EVENT => {
            let ev = &*(p_recv as *const SimRecvEvent);
            SYSTEM_EVENTS
                .iter()
                .find(|(id, _)| *id == ev.u_event_id)
                .map(|(_, name)| {
                    LinkEvent::SystemEvent(SystemEvent {
                        name: name.to_string(),
                        data: ev.dw_data,
                    })
                })
        }
        SIMCONNECT_RECV_ID_SIMOBJECT_DATA => {
            let sod = &*(p_recv as *const SimRecvSimObjectData);
            match sod.dw_request_id {
                REQ_REQUIRED => read_payload(p_recv, cb, REQUIRED_FIELDS)
                    .map(|items| LinkEvent::DataReceived(DataCategory::Required, items)),
                REQ_HUD => read_payload(p_recv, cb, session.hud.fields())
                    .map(|items| LinkEvent::DataReceived(DataCategory::Hud, items)),
                _ => None,
            }
        }
        _ => None,
    }
}

impl SimulatorLink for SimConnectLink {
    fn open(&self, events: Sender<LinkEvent>) -> Result<(), LinkError> {
        self.close()?;
        let fns = self.fns()?;
        let name = c_string(&self.app_name)?;

        let mut h: Handle = std::ptr::null_mut();
        let hr = unsafe {
            (fns.open)(
                &mut h,
                name.as_ptr(),
                std::ptr::null_mut(),
                0,
                std::ptr::null_mut(),
                0xFFFF_FFFF,
            )
        };
        check("SimConnect_Open", hr)?;
        if h.is_null() {
            return Err(LinkError::Call {
                call: "SimConnect_Open",
                hresult: hr_hex(hr),
            });
        }

        add_fields(&fns, h, DEF_REQUIRED, REQUIRED_FIELDS);
        for v in WritableVariable::ALL {
            add_fields(&fns, h, write_def_id(v), &[v.field()]);
        }
        for a in ActionEvent::ALL {
            let r = c_string(a.sim_event_name()).and_then(|n| {
                check("SimConnect_MapClientEventToSimEvent", unsafe {
                    (fns.map_event)(h, action_event_id(a), n.as_ptr())
                })
            });
            if let Err(e) = r {
                warn!(event = a.sim_event_name(), error = %e, "SimConnect: map event failed");
            }
        }
        if let Some(sub) = fns.subscribe_event {
            for (id, ev) in SYSTEM_EVENTS {
                let r = c_string(ev).and_then(|c| {
                    check("SimConnect_SubscribeToSystemEvent", unsafe {
                        sub(h, id, c.as_ptr())
                    })
                });
                if let Err(e) = r {
                    warn!(event = ev, error = %e, "SimConnect: subscribe failed");
                }
            }
        }

        *self.session.lock() = Some(Session {
            handle: h,
            events: events.clone(),
            hud: HudDefinition::NoHudBar,
        });
        info!(app = %self.app_name, "SimConnect session open");
        events.send(LinkEvent::Connected).map_err(|_| LinkError::Closed)
    }

    fn close(&self) -> Result<(), LinkError> {
        let Some(s) = self.session.lock().take() else {
            return Ok(());
        };
        let fns = self.fns()?;
        let hr = unsafe { (fns.close)(s.handle) };
        debug!("SimConnect session closed");
        check("SimConnect_Close", hr)
    }

    fn request_data(&self, category: DataCategory) -> Result<(), LinkError> {
        self.with_session(|fns, s| {
            let (req, def) = match category {
                DataCategory::Required => (REQ_REQUIRED, DEF_REQUIRED),
                DataCategory::Hud if s.hud == HudDefinition::NoHudBar => return Ok(()),
                DataCategory::Hud => (REQ_HUD, DEF_HUD),
            };
            let hr = unsafe {
                (fns.req_data)(
                    s.handle,
                    req,
                    def,
                    USER_OBJECT_ID,
                    SIMCONNECT_PERIOD_ONCE,
                    0,
                    0,
                    0,
                    0,
                )
            };
            check("SimConnect_RequestDataOnSimObject", hr)
        })
    }

    fn drain(&self) -> Result<(), LinkError> {
        self.with_session(|fns, s| {
            loop {
                let mut p_recv: *mut SimRecv = std::ptr::null_mut();
                let mut cb: DWord = 0;
                let hr = unsafe { (fns.next_dispatch)(s.handle, &mut p_recv, &mut cb) };
                if hr < 0 || p_recv.is_null() || cb < std::mem::size_of::<SimRecv>() as u32 {
                    // Queue empty
                    return Ok(());
                }
                if let Some(ev) = unsafe { translate(p_recv, cb, s) } {
                    trace!(?ev, "SimConnect message");
                    s.events.send(ev).map_err(|_| LinkError::Closed)?;
                }
            }
        })
    }

    fn transmit_action(&self, action: ActionEvent, value: u32) -> Result<(), LinkError> {
        self.with_session(|fns, s| {
            let hr = unsafe {
                (fns.transmit_event)(
                    s.handle,
                    USER_OBJECT_ID,
                    action_event_id(action),
                    value,
                    SIMCONNECT_GROUP_PRIORITY_HIGHEST,
                    SIMCONNECT_EVENT_FLAG_GROUPID_IS_PRIORITY,
                )
            };
            check("SimConnect_TransmitClientEvent", hr)
        })
    }

    fn set_variable(&self, variable: WritableVariable, value: f64) -> Result<(), LinkError> {
        self.with_session(|fns, s| {
            let mut v = value;
            let hr = unsafe {
                (fns.set_data)(
                    s.handle,
                    write_def_id(variable),
                    USER_OBJECT_ID,
                    0,
                    0,
                    std::mem::size_of::<f64>() as DWord,
                    (&mut v as *mut f64).cast::<c_void>(),
                )
            };
            check("SimConnect_SetDataOnSimObject", hr)
        })
    }

    fn set_hud_definition(&self, definition: HudDefinition) -> Result<(), LinkError> {
        self.with_session(|fns, s| {
            let hr = unsafe { (fns.clear_def)(s.handle, DEF_HUD) };
            if let Err(e) = check("SimConnect_ClearDataDefinition", hr) {
                // Clearing a never-populated definition is reported as an error.
                trace!(error = %e, "clear hud definition");
            }
            add_fields(fns, s.handle, DEF_HUD, definition.fields());
            s.hud = definition;
            Ok(())
        })
    }
}

impl Drop for SimConnectLink {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
