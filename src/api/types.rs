//! Wire types exchanged with the yard backend

use serde::{Deserialize, Serialize};

/// Lifecycle of a server-side OCR session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Waiting for the phone to send an image
    Pending,
    /// Backend is running recognition on the uploaded image
    Processing,
    /// Plate recognized
    Completed,
    /// Recognition or upload failed
    Error,
}

impl SessionStatus {
    /// Whether the session can no longer change
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Error)
    }
}

/// Status snapshot of an OCR session, as returned by `status-sessao`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrSession {
    /// Opaque session identifier
    #[serde(alias = "sessionId")]
    pub id: String,
    pub status: SessionStatus,
    #[serde(default)]
    pub recognized_plate: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Body of `iniciar-sessao`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTicket {
    pub session_id: String,
}

/// Acknowledgement of an image upload. The backend only promises a JSON
/// object, so every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadAck {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub plate: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// A parking box (slot)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoxResponse {
    pub id_box: i64,
    #[serde(default)]
    pub nome: String,
    /// `"L"` (free) or `"O"` (occupied)
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub data_entrada: Option<String>,
    #[serde(default)]
    pub data_saida: Option<String>,
    #[serde(default)]
    pub observacao: Option<String>,
}

/// One cell of the occupancy map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoxWithPlate {
    #[serde(rename = "box")]
    pub slot: BoxResponse,
    #[serde(default)]
    pub placa: Option<String>,
}

/// Full occupancy snapshot from `vagas/mapa`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapaResponse {
    pub rows: u32,
    pub cols: u32,
    #[serde(default)]
    pub boxes: Vec<BoxWithPlate>,
}

/// Request to park a plate, optionally into a specific box
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParkRequest {
    pub placa: String,
    /// Sent as a string; the backend reads the body as a string map
    #[serde(skip_serializing_if = "Option::is_none")]
    pub box_id: Option<String>,
}

impl ParkRequest {
    pub fn new(plate: &str, box_id: Option<i64>) -> Self {
        Self {
            placa: plate.trim().to_uppercase(),
            box_id: box_id.map(|id| id.to_string()),
        }
    }
}

/// Result of parking a plate
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParkResponse {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub message: Option<String>,
    pub placa: String,
    pub box_id: i64,
}

/// Where a plate is currently parked
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlateLocation {
    pub found: bool,
    pub placa: String,
    #[serde(default)]
    pub box_id: Option<i64>,
    #[serde(default)]
    pub box_nome: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Spring Data page envelope
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpringPage<T> {
    pub content: Vec<T>,
    #[serde(default)]
    pub total_elements: u64,
    #[serde(default)]
    pub total_pages: u32,
    /// Zero-based page index
    #[serde(default)]
    pub number: u32,
    #[serde(default)]
    pub size: u32,
    #[serde(default)]
    pub first: bool,
    #[serde(default)]
    pub last: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_from_backend_json() {
        let json = r#"{"id":"abc123","status":"COMPLETED","recognizedPlate":"ABC1234","errorMessage":null}"#;
        let session: OcrSession = serde_json::from_str(json).unwrap();
        assert_eq!(session.id, "abc123");
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.recognized_plate.as_deref(), Some("ABC1234"));
        assert!(session.error_message.is_none());
    }

    #[test]
    fn test_session_accepts_session_id_alias() {
        let json = r#"{"sessionId":"s-1","status":"PENDING"}"#;
        let session: OcrSession = serde_json::from_str(json).unwrap();
        assert_eq!(session.id, "s-1");
        assert!(!session.status.is_terminal());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Error.is_terminal());
        assert!(!SessionStatus::Processing.is_terminal());
    }

    #[test]
    fn test_mapa_parses_null_plate() {
        let json = r#"{
            "rows": 1, "cols": 2,
            "boxes": [
                {"box": {"idBox": 1, "nome": "A1", "status": "O", "dataEntrada": "2025-01-01", "dataSaida": null, "observacao": null}, "placa": "XYZ9999"},
                {"box": {"idBox": 2, "nome": "A2", "status": "L"}, "placa": null}
            ]
        }"#;
        let mapa: MapaResponse = serde_json::from_str(json).unwrap();
        assert_eq!(mapa.boxes.len(), 2);
        assert_eq!(mapa.boxes[0].slot.nome, "A1");
        assert_eq!(mapa.boxes[0].placa.as_deref(), Some("XYZ9999"));
        assert!(mapa.boxes[1].placa.is_none());
    }

    #[test]
    fn test_park_request_normalizes_plate() {
        let req = ParkRequest::new("  abc1d23 ", Some(12));
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["placa"], "ABC1D23");
        assert_eq!(json["boxId"], "12");

        let req = ParkRequest::new("abc1d23", None);
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("boxId").is_none());
    }

    #[test]
    fn test_plate_location_not_found() {
        let loc: PlateLocation = serde_json::from_str(r#"{"found":false,"placa":"AAA0000"}"#).unwrap();
        assert!(!loc.found);
        assert!(loc.box_id.is_none());
    }
}
