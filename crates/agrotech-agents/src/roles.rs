//! Role catalog
//!
//! A role is pure data: prompt template, fallback schema and sampling
//! options. The same [`AgentRole`](crate::agent::AgentRole) runs all of them.

use agrotech_core::{GenerationOptions, Mapping};
use serde_json::{json, Value};

pub const IMAGE_ANALYST: &str = "ImageAnalyst";
pub const AGRI_VISION: &str = "AgriVision";
pub const SOIL_SENSE: &str = "SoilSense";
pub const CROP_MASTER: &str = "CropMaster";

/// Static description of one agent role
#[derive(Debug, Clone, PartialEq)]
pub struct RoleSpec {
    /// Role name, also the `agent` field of result events
    pub name: String,

    /// Short expertise label
    pub expertise: String,

    /// Status line announced when the stage starts
    pub status_message: String,

    /// Prompt with `{{key}}` placeholders
    pub template: String,

    /// Mapping used when the model output is unusable; its keys are the
    /// role's schema
    pub fallback: Mapping,

    pub options: GenerationOptions,

    /// Input key holding a base64 image to attach to the request
    pub image_input: Option<String>,

    /// Result fields exported as inputs for later stages
    pub publishes: Vec<String>,
}

impl RoleSpec {
    pub fn new(name: impl Into<String>, expertise: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            status_message: format!("{} analizando...", name),
            name,
            expertise: expertise.into(),
            template: String::new(),
            fallback: Mapping::new(),
            options: GenerationOptions::default(),
            image_input: None,
            publishes: Vec::new(),
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    pub fn with_status_message(mut self, message: impl Into<String>) -> Self {
        self.status_message = message.into();
        self
    }

    /// Non-object values leave the fallback empty
    pub fn with_fallback(mut self, fallback: Value) -> Self {
        self.fallback = match fallback {
            Value::Object(map) => map,
            _ => Mapping::new(),
        };
        self
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_image_input(mut self, key: impl Into<String>) -> Self {
        self.image_input = Some(key.into());
        self
    }

    pub fn publishing(mut self, field: impl Into<String>) -> Self {
        self.publishes.push(field.into());
        self
    }

    /// Field names every result of this role carries
    pub fn schema(&self) -> impl Iterator<Item = &str> {
        self.fallback.keys().map(String::as_str)
    }
}

/// Vision-model describer for uploaded photos
pub fn image_analyst() -> RoleSpec {
    RoleSpec::new(IMAGE_ANALYST, "descripción visual de imágenes de cultivos")
        .with_status_message("📷 ImageAnalyst examinando la imagen...")
        .with_image_input("image_base64")
        .publishing("image_description")
        .with_options(
            GenerationOptions::default()
                .with_temperature(0.4)
                .with_num_predict(400),
        )
        .with_template(
            r#"Eres ImageAnalyst, un experto en describir fotografías de cultivos agrícolas.

CONTEXTO AMBIENTAL: "{{environment_description}}"

TAREA: Describe con precisión lo que se observa en la imagen adjunta.

RESPONDE ÚNICAMENTE CON UN JSON VÁLIDO en este formato exacto:
{
    "image_description": "plantas de maíz con hojas verdes y algunas manchas amarillas",
    "soil_visual_indicators": ["suelo seco", "grietas visibles"],
    "environmental_context": "campo abierto con luz solar intensa",
    "plant_health_indicators": ["hojas verdes", "tallos firmes"],
    "recommended_focus_areas": ["manchas en hojas inferiores"],
    "confidence": 0.8
}

REGLAS IMPORTANTES:
- image_description debe ser una frase descriptiva en español
- Las listas deben tener máximo 4 elementos
- NO agregues texto antes o después del JSON

JSON:"#,
        )
        .with_fallback(json!({
            "image_description": "No se pudo analizar la imagen",
            "soil_visual_indicators": [],
            "environmental_context": "unknown",
            "plant_health_indicators": [],
            "recommended_focus_areas": ["Reintentar análisis"],
            "confidence": 0.0
        }))
}

/// Visual crop-health assessor
pub fn agri_vision() -> RoleSpec {
    RoleSpec::new(AGRI_VISION, "análisis visual de cultivos")
        .with_status_message("🔍 AgriVision procesando imagen...")
        .with_template(
            r#"Eres AgriVision, un experto en análisis visual de cultivos agrícolas.

TAREA: Analiza esta descripción de imagen del cultivo: "{{image_description}}"

RESPONDE ÚNICAMENTE CON UN JSON VÁLIDO en este formato exacto:
{
    "crop_health": "healthy",
    "pest_detected": false,
    "leaf_condition": "good",
    "disease_probability": 0.2,
    "visual_symptoms": ["hojas verdes", "sin manchas"],
    "recommendations": ["continuar monitoreo", "revisar en 2 días"],
    "confidence": 0.85
}

REGLAS IMPORTANTES:
- crop_health debe ser: "healthy", "stressed", "diseased"
- pest_detected debe ser: true o false
- leaf_condition debe ser: "excellent", "good", "fair", "poor"
- disease_probability debe ser un número entre 0.0 y 1.0
- NO agregues texto antes o después del JSON
- El JSON debe ser válido y parseable

JSON:"#,
        )
        .with_fallback(json!({
            "crop_health": "unknown",
            "pest_detected": false,
            "leaf_condition": "unknown",
            "disease_probability": 0.0,
            "visual_symptoms": ["Error en análisis"],
            "recommendations": ["Reintentar análisis"],
            "confidence": 0.0
        }))
}

/// Soil and environment assessor
pub fn soil_sense() -> RoleSpec {
    RoleSpec::new(SOIL_SENSE, "condiciones ambientales y del suelo")
        .with_status_message("🌍 SoilSense analizando condiciones ambientales...")
        .with_template(
            r#"Eres SoilSense, especialista en condiciones ambientales y del suelo para agricultura.

TAREA: Analiza estas condiciones ambientales: "{{environment_description}}"

RESPONDE ÚNICAMENTE CON UN JSON VÁLIDO en este formato exacto:
{
    "soil_moisture": 45,
    "ph_level": 6.5,
    "temperature": 24,
    "humidity": 60,
    "irrigation_needed": true,
    "fertilizer_status": "adequate",
    "environmental_stress": "low",
    "alerts": ["humedad baja detectada"],
    "confidence": 0.88
}

REGLAS IMPORTANTES:
- soil_moisture: número entre 0-100 (porcentaje)
- ph_level: número entre 4.0-9.0
- temperature: número entre -10 y 50 (celsius)
- humidity: número entre 0-100 (porcentaje)
- irrigation_needed: true o false
- fertilizer_status: "deficient", "adequate", "excess"
- environmental_stress: "low", "medium", "high"
- NO agregues texto antes o después del JSON

JSON:"#,
        )
        .with_fallback(json!({
            "soil_moisture": 50,
            "ph_level": 7.0,
            "temperature": 25,
            "humidity": 50,
            "irrigation_needed": false,
            "fertilizer_status": "adequate",
            "environmental_stress": "unknown",
            "alerts": [],
            "confidence": 0.0
        }))
}

/// Fuses the earlier assessments into a management decision
pub fn crop_master() -> RoleSpec {
    RoleSpec::new(CROP_MASTER, "toma de decisiones agrícolas integrales")
        .with_status_message("🧠 CropMaster fusionando datos y decidiendo...")
        .with_template(
            r#"Eres CropMaster, el sistema inteligente que toma decisiones agrícolas basado en datos de múltiples sensores.

DATOS DE ENTRADA:
- AgriVision: {{AgriVision}}
- SoilSense: {{SoilSense}}

TAREA: Fusiona toda esta información y toma una decisión integral sobre el manejo del cultivo.

RESPONDE ÚNICAMENTE CON UN JSON VÁLIDO en este formato exacto:
{
    "overall_status": "good",
    "priority_actions": ["regar por 10 minutos", "aplicar fungicida preventivo"],
    "estimated_yield": "high",
    "risk_assessment": "low",
    "next_inspection_hours": 24,
    "economic_impact": "positive",
    "urgent_alerts": [],
    "confidence": 0.92
}

REGLAS IMPORTANTES:
- overall_status: "excellent", "good", "warning", "critical"
- estimated_yield: "high", "medium", "low"
- risk_assessment: "low", "medium", "high", "critical"
- economic_impact: "positive", "neutral", "negative"
- next_inspection_hours: número entre 1 y 168 (1 semana máximo)
- priority_actions: lista de máximo 4 acciones concretas
- NO agregues texto antes o después del JSON

JSON:"#,
        )
        .with_fallback(json!({
            "overall_status": "unknown",
            "priority_actions": ["Error en análisis"],
            "estimated_yield": "unknown",
            "risk_assessment": "unknown",
            "next_inspection_hours": 24,
            "economic_impact": "neutral",
            "urgent_alerts": [],
            "confidence": 0.0
        }))
}

/// Look up a built-in role by name
pub fn by_name(name: &str) -> Option<RoleSpec> {
    match name {
        IMAGE_ANALYST => Some(image_analyst()),
        AGRI_VISION => Some(agri_vision()),
        SOIL_SENSE => Some(soil_sense()),
        CROP_MASTER => Some(crop_master()),
        _ => None,
    }
}

/// Stages for a text-described scenario
pub fn custom_scenario_stages() -> Vec<RoleSpec> {
    vec![agri_vision(), soil_sense(), crop_master()]
}

/// Stages for a photo-backed scenario
pub fn image_scenario_stages() -> Vec<RoleSpec> {
    vec![image_analyst(), agri_vision(), soil_sense(), crop_master()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use agrotech_core::parser::EXPECTED_FIELDS;

    #[test]
    fn test_fallbacks_have_zero_confidence() {
        for role in image_scenario_stages() {
            assert_eq!(role.fallback["confidence"], 0.0, "{}", role.name);
        }
    }

    #[test]
    fn test_schemas_covered_by_partial_reconstruction() {
        let known: Vec<&str> = EXPECTED_FIELDS.iter().map(|f| f.name).collect();
        for role in image_scenario_stages() {
            for field in role.schema() {
                assert!(known.contains(&field), "{} missing {}", role.name, field);
            }
        }
    }

    #[test]
    fn test_only_image_analyst_takes_images() {
        assert_eq!(image_analyst().image_input.as_deref(), Some("image_base64"));
        assert!(custom_scenario_stages()
            .iter()
            .all(|role| role.image_input.is_none()));
    }

    #[test]
    fn test_templates_reference_inputs() {
        assert!(agri_vision().template.contains("{{image_description}}"));
        assert!(soil_sense().template.contains("{{environment_description}}"));
        let fuser = crop_master();
        assert!(fuser.template.contains("{{AgriVision}}"));
        assert!(fuser.template.contains("{{SoilSense}}"));
    }

    #[test]
    fn test_by_name() {
        assert_eq!(by_name("SoilSense").map(|r| r.name), Some("SoilSense".into()));
        assert!(by_name("Unknown").is_none());
    }
}
